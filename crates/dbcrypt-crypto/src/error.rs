use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::{KEY_SIZE, MAX_SEALED_SIZE, MIN_SEALED_SIZE};

pub type CryptResult<T> = Result<T, CryptError>;

/// Step of a stream operation, used to label I/O and framing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReadPlaintext,
    WriteCiphertext,
    ReadNonce,
    ReadChunkLength,
    ReadChunk,
    DecryptChunk,
    WritePlaintext,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ReadPlaintext => "read plaintext",
            Stage::WriteCiphertext => "write ciphertext",
            Stage::ReadNonce => "read nonce",
            Stage::ReadChunkLength => "read chunk length",
            Stage::ReadChunk => "read chunk",
            Stage::DecryptChunk => "decrypt chunk",
            Stage::WritePlaintext => "write plaintext",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CryptError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid key: {got} bytes (expected {})", KEY_SIZE)]
    InvalidKeyLength { got: usize },

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("random number generator failure: {0}")]
    Rng(#[from] rand::Error),

    #[error("{stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage}: stream truncated")]
    Truncated { stage: Stage },

    #[error(
        "read chunk length: frame {frame} declares {len} bytes (expected {}..={})",
        MIN_SEALED_SIZE,
        MAX_SEALED_SIZE
    )]
    FrameLength { frame: u64, len: u32 },

    #[error("seal failed: message exceeds AEAD limits")]
    Seal,

    #[error("decrypt chunk: authentication failed for frame {frame} (wrong key or corrupted data)")]
    Authentication { frame: u64 },

    /// Tag check failed on a single message opened outside a stream.
    #[error("decrypt chunk: authentication failed (wrong key or corrupted data)")]
    Open,

    #[error("nonce space exhausted after {frames} frames")]
    NonceExhausted { frames: u64 },

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("stream consumer went away")]
    PipeClosed,

    #[error("stream worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl CryptError {
    pub(crate) fn io(stage: Stage, source: std::io::Error) -> Self {
        CryptError::Io { stage, source }
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CryptError::File {
            path: path.into(),
            source,
        }
    }

    /// True when a frame failed tag verification (wrong key or tampered data).
    pub fn is_authentication(&self) -> bool {
        matches!(self, CryptError::Authentication { .. } | CryptError::Open)
    }

    /// True for malformed or truncated framing.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            CryptError::Truncated { .. } | CryptError::FrameLength { .. }
        )
    }
}
