//! Encryption metadata sidecar
//!
//! In passphrase mode the salt has to survive next to the backup, so a small
//! JSON document is written beside the ciphertext:
//! ```text
//! backup.dump.enc
//! backup.dump.enc.meta.json  {"algorithm":"aead-256","key_derivation":"pbkdf2-hmac-sha256",
//!                             "salt":"<b64>","nonce":"<b64>","version":1}
//! ```
//!
//! Raw-key streams need no sidecar: the starting nonce is already the first
//! 12 bytes of the ciphertext.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dbcrypt_core::Algorithm;
use serde::{Deserialize, Serialize};

use crate::error::{CryptError, CryptResult};
use crate::{NONCE_SIZE, SALT_SIZE};

/// Sidecar format version
pub const METADATA_VERSION: u32 = 1;

/// Key derivation label recorded in the sidecar
pub const KEY_DERIVATION: &str = "pbkdf2-hmac-sha256";

/// Suffix appended to the ciphertext path
pub const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// Stream construction, always "aead-256"
    pub algorithm: Algorithm,
    /// KDF used to turn the passphrase into a key
    pub key_derivation: String,
    /// PBKDF2 salt (base64)
    pub salt: String,
    /// Starting nonce of the stream (base64)
    pub nonce: String,
    /// Sidecar format version
    pub version: u32,
}

impl EncryptionMetadata {
    pub fn new(salt: &[u8; SALT_SIZE], starting_nonce: &[u8; NONCE_SIZE]) -> Self {
        Self {
            algorithm: Algorithm::Aead256,
            key_derivation: KEY_DERIVATION.into(),
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(starting_nonce),
            version: METADATA_VERSION,
        }
    }

    pub fn salt_bytes(&self) -> CryptResult<[u8; SALT_SIZE]> {
        decode_fixed(&self.salt, "salt")
    }

    pub fn nonce_bytes(&self) -> CryptResult<[u8; NONCE_SIZE]> {
        decode_fixed(&self.nonce, "nonce")
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> CryptResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CryptError::Metadata(format!("serialization: {e}")))
    }

    /// Deserialize from JSON bytes and check version and KDF label
    pub fn from_bytes(data: &[u8]) -> CryptResult<Self> {
        let meta: Self = serde_json::from_slice(data)
            .map_err(|e| CryptError::Metadata(format!("deserialization: {e}")))?;

        if meta.version != METADATA_VERSION {
            return Err(CryptError::Metadata(format!(
                "unsupported version {} (expected {METADATA_VERSION})",
                meta.version
            )));
        }
        if meta.key_derivation != KEY_DERIVATION {
            return Err(CryptError::Metadata(format!(
                "unsupported key derivation '{}'",
                meta.key_derivation
            )));
        }
        Ok(meta)
    }

    pub fn write(&self, path: &Path) -> CryptResult<()> {
        std::fs::write(path, self.to_bytes()?).map_err(|e| CryptError::file(path, e))
    }

    pub fn read(path: &Path) -> CryptResult<Self> {
        let data = std::fs::read(path).map_err(|e| CryptError::file(path, e))?;
        Self::from_bytes(&data)
    }
}

/// Sidecar path for a ciphertext file: `<ciphertext>.meta.json`.
pub fn sidecar_path(ciphertext: &Path) -> PathBuf {
    let mut name = ciphertext.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

fn decode_fixed<const N: usize>(encoded: &str, field: &str) -> CryptResult<[u8; N]> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CryptError::Metadata(format!("{field}: base64 decode: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptError::Metadata(format!(
            "{field}: {} bytes (expected {N})",
            bytes.len()
        ))
    })
}
