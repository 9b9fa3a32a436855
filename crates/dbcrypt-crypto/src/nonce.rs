//! Per-frame nonce sequence
//!
//! Frame `i` of a stream is sealed under `start + i (mod 2^96)`, with the
//! 12-byte nonce read as a big-endian integer. The sequence refuses to hand
//! out a nonce again once it has cycled through all 2^96 values.

use rand::{rngs::OsRng, RngCore};

use crate::error::{CryptError, CryptResult};
use crate::NONCE_SIZE;

/// Counter nonce owned by exactly one stream.
#[derive(Debug)]
pub struct NonceSequence {
    start: [u8; NONCE_SIZE],
    current: [u8; NONCE_SIZE],
    frames: u64,
    exhausted: bool,
}

impl NonceSequence {
    pub fn new(start: [u8; NONCE_SIZE]) -> Self {
        Self {
            start,
            current: start,
            frames: 0,
            exhausted: false,
        }
    }

    /// Start a sequence at a fresh random nonce from the OS CSPRNG.
    pub fn random() -> CryptResult<Self> {
        let mut start = [0u8; NONCE_SIZE];
        OsRng.try_fill_bytes(&mut start)?;
        Ok(Self::new(start))
    }

    pub fn start(&self) -> &[u8; NONCE_SIZE] {
        &self.start
    }

    /// Nonce for the next frame.
    pub fn current(&self) -> CryptResult<&[u8; NONCE_SIZE]> {
        if self.exhausted {
            return Err(CryptError::NonceExhausted {
                frames: self.frames,
            });
        }
        Ok(&self.current)
    }

    /// Number of advances so far (the index of the next frame).
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Increment the counter by one with carry from the last byte.
    ///
    /// Wrapping back to the starting nonce marks the sequence exhausted: the
    /// frame just sealed is fine, asking for another nonce is an error.
    pub fn advance(&mut self) -> CryptResult<()> {
        if self.exhausted {
            return Err(CryptError::NonceExhausted {
                frames: self.frames,
            });
        }

        for byte in self.current.iter_mut().rev() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                break;
            }
        }
        self.frames = self.frames.wrapping_add(1);

        if self.current == self.start {
            tracing::warn!(frames = self.frames, "nonce sequence exhausted");
            self.exhausted = true;
        }
        Ok(())
    }

    #[cfg(test)]
    fn resume(start: [u8; NONCE_SIZE], current: [u8; NONCE_SIZE]) -> Self {
        Self {
            start,
            current,
            frames: 0,
            exhausted: false,
        }
    }
}
