//! Stream keys and the places they are loaded from
//!
//! Key material, wherever it comes from, is either 32 raw bytes or 64 hex
//! characters (a single trailing newline is tolerated).

use std::ffi::OsString;
use std::path::PathBuf;

use dbcrypt_core::EncryptionConfig;
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptError, CryptResult};
use crate::KEY_SIZE;

/// A 256-bit stream key. Zeroized on drop.
#[derive(Clone)]
pub struct StreamKey {
    bytes: [u8; KEY_SIZE],
}

impl StreamKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// All-zero key to be filled in place, so no unwiped copy of the
    /// material is left on the stack.
    pub(crate) fn zeroed() -> Self {
        Self {
            bytes: [0u8; KEY_SIZE],
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8; KEY_SIZE] {
        &mut self.bytes
    }

    /// Parse key material: 32 raw bytes, or 64 hex characters with an optional
    /// trailing `\n` / `\r\n`.
    pub fn from_material(material: &[u8]) -> CryptResult<Self> {
        if material.len() == KEY_SIZE {
            return Self::try_from(material);
        }

        let trimmed = strip_newline(material);
        if trimmed.len() == KEY_SIZE * 2 {
            let mut key = Self::zeroed();
            hex::decode_to_slice(trimmed, key.bytes_mut())
                .map_err(|e| CryptError::InvalidKeyEncoding(e.to_string()))?;
            return Ok(key);
        }

        Self::try_from(trimmed)
    }

    /// Lowercase hex encoding, as written by `dbcrypt keygen`.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes))
    }
}

impl TryFrom<&[u8]> for StreamKey {
    type Error = CryptError;

    fn try_from(bytes: &[u8]) -> CryptResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptError::InvalidKeyLength { got: bytes.len() });
        }
        let mut key = Self::zeroed();
        key.bytes_mut().copy_from_slice(bytes);
        Ok(key)
    }
}

impl Zeroize for StreamKey {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for StreamKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn strip_newline(material: &[u8]) -> &[u8] {
    let material = material.strip_suffix(b"\n").unwrap_or(material);
    material.strip_suffix(b"\r").unwrap_or(material)
}

/// Generate a random 256-bit stream key from the OS CSPRNG.
pub fn generate_key() -> CryptResult<StreamKey> {
    let mut key = StreamKey::zeroed();
    OsRng.try_fill_bytes(key.bytes_mut())?;
    Ok(key)
}

/// Where a stream key comes from.
#[derive(Debug)]
pub enum KeySource {
    /// Key material held in memory (raw or hex)
    RawBytes(Zeroizing<Vec<u8>>),
    /// File holding key material
    KeyFile(PathBuf),
    /// Environment variable holding key material
    EnvVar(String),
}

impl KeySource {
    /// Resolve this source to a key.
    ///
    /// Returns `Ok(None)` only for an unset environment variable; a configured
    /// file or inline key that fails to load is an error, not a fallthrough.
    pub fn resolve(&self) -> CryptResult<Option<StreamKey>> {
        match self {
            KeySource::RawBytes(material) => StreamKey::from_material(material).map(Some),
            KeySource::KeyFile(path) => {
                let material = Zeroizing::new(
                    std::fs::read(path).map_err(|e| CryptError::file(path, e))?,
                );
                let key = StreamKey::from_material(&material)?;
                tracing::debug!(path = %path.display(), "loaded stream key from file");
                Ok(Some(key))
            }
            KeySource::EnvVar(name) => {
                let Some(value) = std::env::var_os(name) else {
                    return Ok(None);
                };
                let material = Zeroizing::new(os_string_bytes(value)?);
                let key = StreamKey::from_material(&material)?;
                tracing::debug!(var = %name, "loaded stream key from environment");
                Ok(Some(key))
            }
        }
    }

    /// Sources named by a config section, in the order this crate tries them:
    /// key file, inline key, environment variable.
    pub fn from_config(config: &EncryptionConfig) -> Vec<KeySource> {
        let mut sources = Vec::new();
        if let Some(path) = &config.key_file {
            sources.push(KeySource::KeyFile(path.clone()));
        }
        if let Some(key) = &config.key {
            sources.push(KeySource::RawBytes(Zeroizing::new(
                key.expose_secret().as_bytes().to_vec(),
            )));
        }
        if let Some(name) = &config.key_env {
            sources.push(KeySource::EnvVar(name.clone()));
        }
        sources
    }

    /// Resolve the first source that yields a key.
    pub fn resolve_first(sources: &[KeySource]) -> CryptResult<Option<StreamKey>> {
        for source in sources {
            if let Some(key) = source.resolve()? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }
}

#[cfg(unix)]
fn os_string_bytes(value: OsString) -> CryptResult<Vec<u8>> {
    use std::os::unix::ffi::OsStringExt;
    Ok(value.into_vec())
}

#[cfg(not(unix))]
fn os_string_bytes(value: OsString) -> CryptResult<Vec<u8>> {
    value
        .into_string()
        .map(String::into_bytes)
        .map_err(|_| CryptError::InvalidKeyEncoding("environment value is not UTF-8".into()))
}

/// Resolve the key for an encryption config section.
///
/// Returns `Ok(None)` when encryption is disabled. When it is enabled and no
/// configured source yields 32 bytes, the configuration is rejected.
pub fn resolve_config_key(config: &EncryptionConfig) -> CryptResult<Option<StreamKey>> {
    if !config.enabled {
        return Ok(None);
    }

    match KeySource::resolve_first(&KeySource::from_config(config))? {
        Some(key) => Ok(Some(key)),
        None => Err(CryptError::Config(
            "encryption is enabled but no key source resolved to a 32-byte key".into(),
        )),
    }
}
