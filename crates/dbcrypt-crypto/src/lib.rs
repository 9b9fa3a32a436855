//! dbcrypt-crypto: streaming authenticated encryption for database backups
//!
//! Architecture: fixed-size chunking, each chunk sealed with AES-256-GCM under a
//! counter nonce derived from a random starting nonce.
//!
//! Wire format (v1):
//! ```text
//! [12 bytes: starting nonce]
//! [4 bytes: BE length L_0][L_0 bytes: ciphertext_0 || tag_0]
//! [4 bytes: BE length L_1][L_1 bytes: ciphertext_1 || tag_1]
//! ...
//! EOF
//! ```
//!
//! Frame `i` is sealed with nonce `starting_nonce + i (mod 2^96)` and empty
//! associated data. End-of-input at a length prefix is the only terminator.
//!
//! Key sources:
//! ```text
//! raw 32 bytes / 64 hex chars ──┐
//!   (inline, key file, env var) ├── StreamKey ── Framer / Deframer
//! passphrase + salt (PBKDF2) ───┘
//! ```

pub mod aead;
pub mod error;
pub mod file;
pub mod kdf;
pub mod keys;
pub mod metadata;
pub mod nonce;
pub mod pipe;
pub mod stream;

pub use aead::{open, seal, ChunkCipher};
pub use error::{CryptError, CryptResult, Stage};
pub use file::{decrypt_file, decrypt_file_async, encrypt_file, encrypt_file_async};
pub use kdf::{derive_key, generate_salt, PBKDF2_ITERATIONS};
pub use keys::{generate_key, resolve_config_key, KeySource, StreamKey};
pub use metadata::EncryptionMetadata;
pub use nonce::NonceSequence;
pub use pipe::{decrypt_pipe, encrypt_pipe};
pub use stream::{decrypt_stream, encrypt_stream, Deframer, Framer, StreamStats};

/// Size of a stream key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a PBKDF2 salt
pub const SALT_SIZE: usize = 32;

/// Size of a frame length prefix (big-endian u32)
pub const LENGTH_SIZE: usize = 4;

/// Maximum plaintext bytes sealed into one frame
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Smallest valid sealed frame (empty ciphertext plus tag)
pub const MIN_SEALED_SIZE: usize = TAG_SIZE;

/// Largest valid sealed frame
pub const MAX_SEALED_SIZE: usize = CHUNK_SIZE + TAG_SIZE;
