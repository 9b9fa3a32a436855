//! File driver: path in, path out
//!
//! The key is validated before either file is touched. Handles are closed on
//! every exit path by drop. A failed run leaves its partial output in place;
//! cleaning it up is the caller's call.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::{CryptError, CryptResult};
use crate::keys::StreamKey;
use crate::pipe::{decrypt_pipe, encrypt_pipe};
use crate::stream::{decrypt_stream, encrypt_stream, StreamStats};
use crate::{LENGTH_SIZE, MAX_SEALED_SIZE};

/// Encrypt `in_path` into a newly created `out_path`.
pub fn encrypt_file(in_path: &Path, out_path: &Path, key: &[u8]) -> CryptResult<StreamStats> {
    let key = StreamKey::try_from(key)?;
    let input = File::open(in_path).map_err(|e| CryptError::file(in_path, e))?;
    let output = File::create(out_path).map_err(|e| CryptError::file(out_path, e))?;

    let mut writer = BufWriter::with_capacity(LENGTH_SIZE + MAX_SEALED_SIZE, output);
    let stats = encrypt_stream(&key, input, &mut writer)?;
    sync(writer, out_path)?;

    tracing::info!(
        input = %in_path.display(),
        output = %out_path.display(),
        frames = stats.frames,
        bytes = stats.plaintext_bytes,
        "encrypted file"
    );
    Ok(stats)
}

/// Decrypt `in_path` into a newly created `out_path`.
pub fn decrypt_file(in_path: &Path, out_path: &Path, key: &[u8]) -> CryptResult<StreamStats> {
    let key = StreamKey::try_from(key)?;
    let input = File::open(in_path).map_err(|e| CryptError::file(in_path, e))?;
    let output = File::create(out_path).map_err(|e| CryptError::file(out_path, e))?;

    let mut writer = BufWriter::with_capacity(MAX_SEALED_SIZE, output);
    let stats = decrypt_stream(&key, input, &mut writer)?;
    sync(writer, out_path)?;

    tracing::info!(
        input = %in_path.display(),
        output = %out_path.display(),
        frames = stats.frames,
        bytes = stats.plaintext_bytes,
        "decrypted file"
    );
    Ok(stats)
}

fn sync(writer: BufWriter<File>, path: &Path) -> CryptResult<()> {
    let file = writer
        .into_inner()
        .map_err(|e| CryptError::file(path, e.into_error()))?;
    file.sync_all().map_err(|e| CryptError::file(path, e))
}

/// Async variant of [`encrypt_file`]: the framer runs on a blocking worker.
pub async fn encrypt_file_async(
    in_path: &Path,
    out_path: &Path,
    key: &[u8],
) -> CryptResult<StreamStats> {
    let key = StreamKey::try_from(key)?;
    let input = File::open(in_path).map_err(|e| CryptError::file(in_path, e))?;
    let mut output = tokio::fs::File::create(out_path)
        .await
        .map_err(|e| CryptError::file(out_path, e))?;

    let stats = encrypt_pipe(&key, input, &mut output).await?;
    output
        .sync_all()
        .await
        .map_err(|e| CryptError::file(out_path, e))?;

    tracing::info!(
        input = %in_path.display(),
        output = %out_path.display(),
        frames = stats.frames,
        bytes = stats.plaintext_bytes,
        "encrypted file"
    );
    Ok(stats)
}

/// Async variant of [`decrypt_file`]: the deframer runs on a blocking worker.
pub async fn decrypt_file_async(
    in_path: &Path,
    out_path: &Path,
    key: &[u8],
) -> CryptResult<StreamStats> {
    let key = StreamKey::try_from(key)?;
    let input = File::open(in_path).map_err(|e| CryptError::file(in_path, e))?;
    let mut output = tokio::fs::File::create(out_path)
        .await
        .map_err(|e| CryptError::file(out_path, e))?;

    let stats = decrypt_pipe(&key, input, &mut output).await?;
    output
        .sync_all()
        .await
        .map_err(|e| CryptError::file(out_path, e))?;

    tracing::info!(
        input = %in_path.display(),
        output = %out_path.display(),
        frames = stats.frames,
        bytes = stats.plaintext_bytes,
        "decrypted file"
    );
    Ok(stats)
}
