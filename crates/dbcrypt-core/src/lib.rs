pub mod config;
pub mod error;

pub use config::{Algorithm, DbcryptConfig, EncryptionConfig, LogConfig, LogFormat, DEFAULT_KEY_ENV};
pub use error::{ConfigError, ConfigResult};
