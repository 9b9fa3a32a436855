//! AES-256-GCM primitives adapter
//!
//! Sealed message format:
//! ```text
//! [N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! No associated data is mixed into any seal. Binding a header or frame index
//! as AAD would change the wire format and needs a version bump.

use aes_gcm::{
    aead::{Aead, AeadInPlace, KeyInit, Payload},
    Aes256Gcm, Nonce, Tag,
};

use crate::error::{CryptError, CryptResult};
use crate::keys::StreamKey;
use crate::{NONCE_SIZE, TAG_SIZE};

const NO_AAD: &[u8] = &[];

/// A keyed AES-256-GCM instance, built once per stream.
pub struct ChunkCipher {
    cipher: Aes256Gcm,
}

impl ChunkCipher {
    pub fn new(key: &StreamKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.as_bytes().into()),
        }
    }

    /// Seal `plaintext`, returning `ciphertext || tag` (`plaintext.len() + 16` bytes).
    pub fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> CryptResult<Vec<u8>> {
        self.cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: NO_AAD,
                },
            )
            .map_err(|_| CryptError::Seal)
    }

    /// Open `ciphertext || tag`. A bad tag yields [`CryptError::Open`].
    pub fn open(&self, nonce: &[u8; NONCE_SIZE], sealed: &[u8]) -> CryptResult<Vec<u8>> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptError::Truncated {
                stage: crate::Stage::DecryptChunk,
            });
        }

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: NO_AAD,
                },
            )
            .map_err(|_| CryptError::Open)
    }

    /// Encrypt `buf` in place and return the detached tag.
    pub(crate) fn seal_in_place(
        &self,
        nonce: &[u8; NONCE_SIZE],
        buf: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], aes_gcm::Error> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), NO_AAD, buf)?;
        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Verify `tag` over `buf` and decrypt it in place. On failure `buf` holds
    /// unauthenticated bytes and must be discarded.
    pub(crate) fn open_in_place(
        &self,
        nonce: &[u8; NONCE_SIZE],
        buf: &mut [u8],
        tag: &[u8],
    ) -> Result<(), aes_gcm::Error> {
        self.cipher.decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            NO_AAD,
            buf,
            Tag::from_slice(tag),
        )
    }
}

/// One-shot seal under `key`.
pub fn seal(key: &StreamKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> CryptResult<Vec<u8>> {
    ChunkCipher::new(key).seal(nonce, plaintext)
}

/// One-shot open under `key`.
pub fn open(key: &StreamKey, nonce: &[u8; NONCE_SIZE], sealed: &[u8]) -> CryptResult<Vec<u8>> {
    ChunkCipher::new(key).open(nonce, sealed)
}
