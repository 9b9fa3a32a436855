//! Chunk framer and deframer
//!
//! Stream layout:
//! ```text
//! [12 bytes: starting nonce]
//! { [4 bytes: BE sealed length L][L bytes: ciphertext || 16-byte tag] }*
//! ```
//!
//! Plaintext is cut into 64 KiB chunks; the last one may be short. An empty
//! plaintext yields just the starting nonce. There is no end marker: a clean
//! end-of-input at a length prefix ends the stream, anywhere else it is a
//! truncation.
//!
//! Both halves hold a single frame buffer (zeroized on drop), so memory use is
//! independent of stream length.

use std::io::{self, Read, Write};

use zeroize::{Zeroize, Zeroizing};

use crate::aead::ChunkCipher;
use crate::error::{CryptError, CryptResult, Stage};
use crate::keys::StreamKey;
use crate::nonce::NonceSequence;
use crate::{CHUNK_SIZE, LENGTH_SIZE, MAX_SEALED_SIZE, MIN_SEALED_SIZE, NONCE_SIZE, TAG_SIZE};

/// Totals for one encrypt or decrypt stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Sealed frames written or opened
    pub frames: u64,
    /// Plaintext bytes consumed or produced
    pub plaintext_bytes: u64,
    /// Ciphertext bytes produced or consumed, nonce and length prefixes included
    pub ciphertext_bytes: u64,
    /// The stream's starting nonce
    pub starting_nonce: [u8; NONCE_SIZE],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramerState {
    Header,
    Frames,
    Done,
}

/// Encrypt side: pulls plaintext from `R` and hands out wire-format bytes,
/// one frame at a time.
pub struct Framer<R> {
    reader: R,
    cipher: ChunkCipher,
    nonces: NonceSequence,
    frame: Zeroizing<Vec<u8>>,
    state: FramerState,
    stats: StreamStats,
}

impl<R: Read> Framer<R> {
    /// Start a stream at a random nonce.
    pub fn new(key: &StreamKey, reader: R) -> CryptResult<Self> {
        Ok(Self::with_nonces(key, reader, NonceSequence::random()?))
    }

    pub(crate) fn with_nonces(key: &StreamKey, reader: R, nonces: NonceSequence) -> Self {
        let stats = StreamStats {
            starting_nonce: *nonces.start(),
            ..Default::default()
        };
        Self {
            reader,
            cipher: ChunkCipher::new(key),
            nonces,
            frame: Zeroizing::new(Vec::with_capacity(LENGTH_SIZE + MAX_SEALED_SIZE)),
            state: FramerState::Header,
            stats,
        }
    }

    pub fn starting_nonce(&self) -> &[u8; NONCE_SIZE] {
        self.nonces.start()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Next piece of ciphertext: the starting nonce first, then one
    /// `length || sealed` frame per call. `None` once the source is drained.
    ///
    /// After an error the framer is finished and returns `None`.
    pub fn next_frame(&mut self) -> CryptResult<Option<&[u8]>> {
        match self.state {
            FramerState::Header => {
                self.state = FramerState::Frames;
                self.stats.ciphertext_bytes += NONCE_SIZE as u64;
                return Ok(Some(self.nonces.start().as_slice()));
            }
            FramerState::Done => return Ok(None),
            FramerState::Frames => {}
        }

        match self.seal_next() {
            Ok(true) => Ok(Some(self.frame.as_slice())),
            Ok(false) => {
                self.state = FramerState::Done;
                tracing::debug!(
                    frames = self.stats.frames,
                    plaintext_bytes = self.stats.plaintext_bytes,
                    "encrypt stream finished"
                );
                Ok(None)
            }
            Err(e) => {
                self.state = FramerState::Done;
                self.frame.zeroize();
                Err(e)
            }
        }
    }

    fn seal_next(&mut self) -> CryptResult<bool> {
        self.frame.clear();
        self.frame.resize(LENGTH_SIZE + CHUNK_SIZE, 0);

        let n = read_full(&mut self.reader, &mut self.frame[LENGTH_SIZE..])
            .map_err(|e| CryptError::io(Stage::ReadPlaintext, e))?;
        if n == 0 {
            self.frame.clear();
            return Ok(false);
        }

        let nonce = *self.nonces.current()?;
        let body = LENGTH_SIZE..LENGTH_SIZE + n;
        let tag = self
            .cipher
            .seal_in_place(&nonce, &mut self.frame[body])
            .map_err(|_| CryptError::Seal)?;

        self.frame.truncate(LENGTH_SIZE + n);
        self.frame.extend_from_slice(&tag);
        let sealed_len = (n + TAG_SIZE) as u32;
        self.frame[..LENGTH_SIZE].copy_from_slice(&sealed_len.to_be_bytes());

        tracing::trace!(frame = self.nonces.frames(), sealed_len, "sealed frame");
        self.nonces.advance()?;

        self.stats.frames += 1;
        self.stats.plaintext_bytes += n as u64;
        self.stats.ciphertext_bytes += (LENGTH_SIZE + n + TAG_SIZE) as u64;
        Ok(true)
    }

    #[cfg(test)]
    fn buffer_capacity(&self) -> usize {
        self.frame.capacity()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeframeState {
    Init,
    ReadLength,
    ReadBody { len: usize },
    End,
}

/// Decrypt side: pulls wire-format bytes from `R` and hands out authenticated
/// plaintext, one chunk at a time.
pub struct Deframer<R> {
    reader: R,
    cipher: ChunkCipher,
    nonces: NonceSequence,
    buf: Zeroizing<Vec<u8>>,
    state: DeframeState,
    stats: StreamStats,
}

impl<R: Read> Deframer<R> {
    /// Nothing is read until the first call to [`Deframer::next_chunk`].
    pub fn new(key: &StreamKey, reader: R) -> Self {
        Self {
            reader,
            cipher: ChunkCipher::new(key),
            nonces: NonceSequence::new([0u8; NONCE_SIZE]),
            buf: Zeroizing::new(Vec::with_capacity(MAX_SEALED_SIZE)),
            state: DeframeState::Init,
            stats: StreamStats::default(),
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Next authenticated plaintext chunk, or `None` at a clean end of stream.
    ///
    /// A chunk is only returned after its tag verified. After an error the
    /// deframer is finished and returns `None`.
    pub fn next_chunk(&mut self) -> CryptResult<Option<&[u8]>> {
        match self.step() {
            Ok(Some(len)) => Ok(Some(&self.buf[..len])),
            Ok(None) => Ok(None),
            Err(e) => {
                self.state = DeframeState::End;
                self.buf.zeroize();
                Err(e)
            }
        }
    }

    fn step(&mut self) -> CryptResult<Option<usize>> {
        loop {
            match self.state {
                DeframeState::Init => {
                    let mut start = [0u8; NONCE_SIZE];
                    let n = read_full(&mut self.reader, &mut start)
                        .map_err(|e| CryptError::io(Stage::ReadNonce, e))?;
                    if n < NONCE_SIZE {
                        return Err(CryptError::Truncated {
                            stage: Stage::ReadNonce,
                        });
                    }
                    self.nonces = NonceSequence::new(start);
                    self.stats.starting_nonce = start;
                    self.stats.ciphertext_bytes += NONCE_SIZE as u64;
                    self.state = DeframeState::ReadLength;
                }
                DeframeState::ReadLength => {
                    let mut prefix = [0u8; LENGTH_SIZE];
                    let n = read_full(&mut self.reader, &mut prefix)
                        .map_err(|e| CryptError::io(Stage::ReadChunkLength, e))?;
                    if n == 0 {
                        self.state = DeframeState::End;
                        tracing::debug!(
                            frames = self.stats.frames,
                            plaintext_bytes = self.stats.plaintext_bytes,
                            "decrypt stream finished"
                        );
                        return Ok(None);
                    }
                    if n < LENGTH_SIZE {
                        return Err(CryptError::Truncated {
                            stage: Stage::ReadChunkLength,
                        });
                    }

                    let len = u32::from_be_bytes(prefix);
                    if (len as usize) < MIN_SEALED_SIZE || (len as usize) > MAX_SEALED_SIZE {
                        return Err(CryptError::FrameLength {
                            frame: self.nonces.frames(),
                            len,
                        });
                    }
                    self.state = DeframeState::ReadBody { len: len as usize };
                }
                DeframeState::ReadBody { len } => {
                    self.buf.clear();
                    self.buf.resize(len, 0);
                    let n = read_full(&mut self.reader, &mut self.buf[..])
                        .map_err(|e| CryptError::io(Stage::ReadChunk, e))?;
                    if n < len {
                        return Err(CryptError::Truncated {
                            stage: Stage::ReadChunk,
                        });
                    }

                    let frame = self.nonces.frames();
                    let nonce = *self.nonces.current()?;
                    let (body, tag) = self.buf.split_at_mut(len - TAG_SIZE);
                    self.cipher
                        .open_in_place(&nonce, body, tag)
                        .map_err(|_| CryptError::Authentication { frame })?;

                    tracing::trace!(frame, sealed_len = len, "opened frame");
                    self.nonces.advance()?;

                    let plain_len = len - TAG_SIZE;
                    self.stats.frames += 1;
                    self.stats.plaintext_bytes += plain_len as u64;
                    self.stats.ciphertext_bytes += (LENGTH_SIZE + len) as u64;
                    self.state = DeframeState::ReadLength;
                    return Ok(Some(plain_len));
                }
                DeframeState::End => return Ok(None),
            }
        }
    }
}

/// Encrypt everything `reader` yields into `writer`.
///
/// The writer is flushed on success. On error, whatever was already written
/// stays written.
pub fn encrypt_stream<R: Read, W: Write>(
    key: &StreamKey,
    reader: R,
    mut writer: W,
) -> CryptResult<StreamStats> {
    let mut framer = Framer::new(key, reader)?;
    while let Some(frame) = framer.next_frame()? {
        writer
            .write_all(frame)
            .map_err(|e| CryptError::io(Stage::WriteCiphertext, e))?;
    }
    writer
        .flush()
        .map_err(|e| CryptError::io(Stage::WriteCiphertext, e))?;
    Ok(framer.stats())
}

/// Decrypt a wire-format stream from `reader` into `writer`.
///
/// Each chunk is written as soon as it authenticates, so a failure mid-stream
/// leaves the earlier (authentic) chunks in `writer`; callers must treat the
/// whole output as invalid in that case.
pub fn decrypt_stream<R: Read, W: Write>(
    key: &StreamKey,
    reader: R,
    mut writer: W,
) -> CryptResult<StreamStats> {
    let mut deframer = Deframer::new(key, reader);
    while let Some(chunk) = deframer.next_chunk()? {
        writer
            .write_all(chunk)
            .map_err(|e| CryptError::io(Stage::WritePlaintext, e))?;
    }
    writer
        .flush()
        .map_err(|e| CryptError::io(Stage::WritePlaintext, e))?;
    Ok(deframer.stats())
}

/// Read until `buf` is full or the source is drained; returns the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead;
    use crate::KEY_SIZE;
    use std::io::Cursor;

    fn test_key() -> StreamKey {
        StreamKey::from_bytes([0x42u8; KEY_SIZE])
    }

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Reader that fails after yielding `ok` bytes.
    struct FailAfter {
        ok: usize,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.ok == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk on fire"));
            }
            let n = self.ok.min(buf.len());
            buf[..n].fill(0x11);
            self.ok -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_frames_use_counter_nonces() {
        let key = test_key();
        let mut start = [0u8; NONCE_SIZE];
        start[NONCE_SIZE - 1] = 0xFE;
        let plaintext = vec![0x5Au8; CHUNK_SIZE * 2 + 10];

        let mut framer =
            Framer::with_nonces(&key, Cursor::new(plaintext.clone()), NonceSequence::new(start));
        assert_eq!(framer.next_frame().unwrap().unwrap(), &start);

        let mut expected = NonceSequence::new(start);
        let mut recovered = Vec::new();
        while let Some(frame) = framer.next_frame().unwrap() {
            let len = u32::from_be_bytes(frame[..LENGTH_SIZE].try_into().unwrap()) as usize;
            assert_eq!(len, frame.len() - LENGTH_SIZE);

            let nonce = *expected.current().unwrap();
            recovered.extend(aead::open(&key, &nonce, &frame[LENGTH_SIZE..]).unwrap());
            expected.advance().unwrap();
        }

        assert_eq!(recovered, plaintext);
        assert_eq!(framer.stats().frames, 3);
    }

    #[test]
    fn test_short_reads_still_fill_chunks() {
        let key = test_key();
        let data = vec![0x33u8; CHUNK_SIZE + 1];
        let reader = Trickle {
            data: data.clone(),
            pos: 0,
            step: 1000,
        };

        let mut out = Vec::new();
        let stats = encrypt_stream(&key, reader, &mut out).unwrap();

        assert_eq!(stats.frames, 2);
        assert_eq!(out.len(), NONCE_SIZE + 2 * (LENGTH_SIZE + TAG_SIZE) + data.len());
    }

    #[test]
    fn test_deframer_handles_trickled_ciphertext() {
        let key = test_key();
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 77).map(|i| i as u8).collect();
        let mut ciphertext = Vec::new();
        encrypt_stream(&key, Cursor::new(&data), &mut ciphertext).unwrap();

        let reader = Trickle {
            data: ciphertext,
            pos: 0,
            step: 3,
        };
        let mut out = Vec::new();
        decrypt_stream(&key, reader, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_source_error_halts_framer() {
        let key = test_key();
        let mut framer = Framer::new(&key, FailAfter { ok: 100 }).unwrap();

        assert!(framer.next_frame().unwrap().is_some(), "nonce header");
        let err = framer.next_frame().unwrap_err();
        assert!(matches!(
            err,
            CryptError::Io {
                stage: Stage::ReadPlaintext,
                ..
            }
        ));
        assert!(framer.next_frame().unwrap().is_none(), "framer is done after error");
    }

    #[test]
    fn test_deframer_done_after_error() {
        let key = test_key();
        let mut ciphertext = Vec::new();
        encrypt_stream(&key, Cursor::new(b"abc"), &mut ciphertext).unwrap();
        ciphertext[NONCE_SIZE + LENGTH_SIZE] ^= 0x80;

        let mut deframer = Deframer::new(&key, Cursor::new(ciphertext));
        assert!(deframer.next_chunk().unwrap_err().is_authentication());
        assert!(deframer.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_deframer_done_after_end() {
        let key = test_key();
        let mut ciphertext = Vec::new();
        encrypt_stream(&key, Cursor::new(b"abc"), &mut ciphertext).unwrap();

        let mut deframer = Deframer::new(&key, Cursor::new(ciphertext));
        assert_eq!(deframer.next_chunk().unwrap().unwrap(), b"abc");
        assert!(deframer.next_chunk().unwrap().is_none());
        assert!(deframer.next_chunk().unwrap().is_none());
        assert_eq!(deframer.stats().frames, 1);
    }

    #[test]
    fn test_length_bounds_rejected() {
        let key = test_key();
        for len in [0u32, 15, (MAX_SEALED_SIZE + 1) as u32, u32::MAX] {
            let mut ciphertext = vec![0u8; NONCE_SIZE];
            ciphertext.extend_from_slice(&len.to_be_bytes());
            ciphertext.extend_from_slice(&[0u8; 32]);

            let err = decrypt_stream(&key, Cursor::new(ciphertext), io::sink()).unwrap_err();
            assert!(
                matches!(err, CryptError::FrameLength { frame: 0, len: l } if l == len),
                "length {len} must be rejected, got {err}"
            );
        }
    }

    #[test]
    fn test_partial_length_prefix_is_truncation() {
        let key = test_key();
        let mut ciphertext = vec![0u8; NONCE_SIZE];
        ciphertext.extend_from_slice(&[0, 0]);

        let err = decrypt_stream(&key, Cursor::new(ciphertext), io::sink()).unwrap_err();
        assert!(matches!(
            err,
            CryptError::Truncated {
                stage: Stage::ReadChunkLength
            }
        ));
    }

    #[test]
    fn test_short_nonce_is_truncation() {
        let key = test_key();
        for len in [0usize, 1, NONCE_SIZE - 1] {
            let err = decrypt_stream(&key, Cursor::new(vec![0u8; len]), io::sink()).unwrap_err();
            assert!(matches!(
                err,
                CryptError::Truncated {
                    stage: Stage::ReadNonce
                }
            ));
        }
    }

    #[test]
    fn test_sink_error_propagates() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let key = test_key();
        let err = encrypt_stream(&key, Cursor::new(vec![1u8; 10]), Closed).unwrap_err();
        assert!(matches!(
            err,
            CryptError::Io {
                stage: Stage::WriteCiphertext,
                ..
            }
        ));
    }

    #[test]
    fn test_buffer_stays_bounded() {
        let key = test_key();
        let source = io::repeat(0xAB).take(16 * CHUNK_SIZE as u64 + 5);
        let mut framer = Framer::new(&key, source).unwrap();
        let capacity = framer.buffer_capacity();
        assert!(capacity >= LENGTH_SIZE + MAX_SEALED_SIZE);

        let mut frames = 0;
        while let Some(frame) = framer.next_frame().unwrap() {
            assert!(frame.len() <= LENGTH_SIZE + MAX_SEALED_SIZE);
            assert_eq!(framer.buffer_capacity(), capacity, "frame buffer never grows");
            frames += 1;
        }
        // nonce header + 17 frames
        assert_eq!(frames, 18);
    }
}
