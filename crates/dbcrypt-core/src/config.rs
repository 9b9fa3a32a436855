use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Environment variable consulted for the stream key when no other source is configured.
pub const DEFAULT_KEY_ENV: &str = "DBBACKUP_ENCRYPTION_KEY";

/// Top-level configuration (loaded from dbcrypt.toml)
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbcryptConfig {
    pub encryption: EncryptionConfig,
    pub log: LogConfig,
}

impl DbcryptConfig {
    /// Load the configuration at `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.encryption.validate()
    }
}

/// Stream cipher selector. Only one construction is defined by wire format v1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256-GCM: 256-bit key, 96-bit nonce, 128-bit tag
    #[default]
    #[serde(rename = "aead-256")]
    Aead256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aead256 => "aead-256",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backup encryption configuration.
///
/// Exactly one key source has to resolve when `enabled` is set; which one wins
/// is left to the caller.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Master switch (default: false)
    pub enabled: bool,
    /// Stream construction (default: aead-256)
    pub algorithm: Algorithm,
    /// Inline key, 64 hex characters. Never written back out.
    #[serde(skip_serializing)]
    pub key: Option<SecretString>,
    /// File holding 32 raw key bytes or 64 hex characters
    pub key_file: Option<PathBuf>,
    /// Environment variable holding the key (default: DBBACKUP_ENCRYPTION_KEY)
    pub key_env: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: Algorithm::default(),
            key: None,
            key_file: None,
            key_env: Some(DEFAULT_KEY_ENV.into()),
        }
    }
}

impl EncryptionConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(name) = &self.key_env {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "encryption.key_env must not be empty".into(),
                ));
            }
        }
        if let Some(path) = &self.key_file {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "encryption.key_file must not be empty".into(),
                ));
            }
        }
        if self.enabled && self.key.is_none() && self.key_file.is_none() && self.key_env.is_none()
        {
            return Err(ConfigError::Invalid(
                "encryption is enabled but no key source is configured".into(),
            ));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or EnvFilter directive (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}
