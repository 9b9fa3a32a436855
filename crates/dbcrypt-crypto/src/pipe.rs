//! Background producer for async callers
//!
//! The framer (or deframer) runs on a blocking worker and pushes frames into a
//! bounded channel; the caller's task drains the channel into an
//! [`AsyncWrite`]. Order is preserved because there is exactly one producer and
//! one consumer.
//!
//! Errors travel both ways: a worker error ends the channel and is returned
//! from the join handle; a writer error drops the receiver, which makes the
//! worker's next send fail so it stops reading and releases the source.

use std::io::Read;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use zeroize::Zeroizing;

use crate::error::{CryptError, CryptResult, Stage};
use crate::keys::StreamKey;
use crate::stream::{Deframer, Framer, StreamStats};

/// Frames buffered between worker and writer.
const PIPE_DEPTH: usize = 4;

/// Encrypt `reader` into `writer` with the framer on a blocking worker.
pub async fn encrypt_pipe<R, W>(key: &StreamKey, reader: R, writer: &mut W) -> CryptResult<StreamStats>
where
    R: Read + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let key = key.clone();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(PIPE_DEPTH);

    let worker = tokio::task::spawn_blocking(move || {
        let mut framer = Framer::new(&key, reader)?;
        drop(key);
        while let Some(frame) = framer.next_frame()? {
            tx.blocking_send(frame.to_vec())
                .map_err(|_| CryptError::PipeClosed)?;
        }
        Ok::<_, CryptError>(framer.stats())
    });

    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!("ciphertext sink failed, abandoning stream");
            return Err(CryptError::io(Stage::WriteCiphertext, e));
        }
    }

    let stats = worker.await??;
    writer
        .flush()
        .await
        .map_err(|e| CryptError::io(Stage::WriteCiphertext, e))?;
    Ok(stats)
}

/// Decrypt `reader` into `writer` with the deframer on a blocking worker.
///
/// Chunks reach `writer` as soon as they authenticate; on error the output
/// written so far must be discarded by the caller.
pub async fn decrypt_pipe<R, W>(key: &StreamKey, reader: R, writer: &mut W) -> CryptResult<StreamStats>
where
    R: Read + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let key = key.clone();
    let (tx, mut rx) = mpsc::channel::<Zeroizing<Vec<u8>>>(PIPE_DEPTH);

    let worker = tokio::task::spawn_blocking(move || {
        let mut deframer = Deframer::new(&key, reader);
        drop(key);
        while let Some(chunk) = deframer.next_chunk()? {
            tx.blocking_send(Zeroizing::new(chunk.to_vec()))
                .map_err(|_| CryptError::PipeClosed)?;
        }
        Ok::<_, CryptError>(deframer.stats())
    });

    while let Some(chunk) = rx.recv().await {
        if let Err(e) = writer.write_all(&chunk).await {
            tracing::debug!("plaintext sink failed, abandoning stream");
            return Err(CryptError::io(Stage::WritePlaintext, e));
        }
    }

    let stats = worker.await??;
    writer
        .flush()
        .await
        .map_err(|e| CryptError::io(Stage::WritePlaintext, e))?;
    Ok(stats)
}
