//! Key derivation: passphrase + salt → stream key via PBKDF2-HMAC-SHA256

use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::CryptResult;
use crate::keys::StreamKey;
use crate::SALT_SIZE;

/// PBKDF2 iteration count. Part of the protocol: changing it breaks every
/// passphrase-encrypted backup written so far.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Derive a 256-bit stream key from a passphrase and a 32-byte salt.
///
/// The salt is not secret; it is stored in the metadata sidecar next to the
/// ciphertext.
pub fn derive_key(passphrase: &SecretString, salt: &[u8; SALT_SIZE]) -> StreamKey {
    derive_with_rounds(
        passphrase.expose_secret().as_bytes(),
        salt,
        PBKDF2_ITERATIONS,
    )
}

pub(crate) fn derive_with_rounds(password: &[u8], salt: &[u8], rounds: u32) -> StreamKey {
    let mut key = StreamKey::zeroed();
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, rounds, key.bytes_mut());
    key
}

/// Draw a fresh 32-byte salt from the OS CSPRNG.
pub fn generate_salt() -> CryptResult<[u8; SALT_SIZE]> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.try_fill_bytes(&mut salt)?;
    Ok(salt)
}
