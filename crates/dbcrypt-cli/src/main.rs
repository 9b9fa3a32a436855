//! dbcrypt: streaming encryption for database backups
//!
//! Commands:
//!   encrypt <in> <out>   - encrypt a backup (key file / config / env, or --passphrase)
//!   decrypt <in> <out>   - decrypt a backup produced by `encrypt`
//!   keygen <out>         - write a fresh hex-encoded 256-bit key
//!   config show          - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use dbcrypt_core::config::DbcryptConfig;
use dbcrypt_crypto::metadata::{sidecar_path, EncryptionMetadata};
use dbcrypt_crypto::{KeySource, StreamKey, StreamStats};

/// Environment variable consulted before prompting for a passphrase
const PASSPHRASE_ENV: &str = "DBCRYPT_PASSPHRASE";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "dbcrypt",
    version,
    about = "Streaming authenticated encryption for database backups",
    long_about = "dbcrypt: encrypt and decrypt database backup artifacts with AES-256-GCM chunk framing"
)]
struct Cli {
    /// Path to dbcrypt.toml configuration file
    #[arg(long, short = 'c', env = "DBCRYPT_CONFIG", default_value = "/etc/dbcrypt/config.toml")]
    config: PathBuf,

    /// Log level or filter directive (overrides config)
    #[arg(long, env = "DBCRYPT_LOG")]
    log: Option<String>,

    /// Log format (overrides config)
    #[arg(long, env = "DBCRYPT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

impl From<dbcrypt_core::LogFormat> for LogFormat {
    fn from(format: dbcrypt_core::LogFormat) -> Self {
        match format {
            dbcrypt_core::LogFormat::Json => LogFormat::Json,
            dbcrypt_core::LogFormat::Text => LogFormat::Text,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a backup file
    ///
    /// The key comes from --key-file, then the [encryption] config section
    /// (key_file, key, key_env), in that order, whether or not
    /// encryption.enabled is set. With --passphrase a key is derived instead
    /// and a <output>.meta.json sidecar records the salt.
    Encrypt {
        /// Plaintext input
        input: PathBuf,
        /// Ciphertext output (created or truncated)
        output: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Decrypt a backup file
    Decrypt {
        /// Ciphertext input
        input: PathBuf,
        /// Plaintext output (created or truncated)
        output: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Generate a random 256-bit key and write it as hex
    Keygen {
        /// Destination key file
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct KeyArgs {
    /// Key file: 32 raw bytes or 64 hex characters
    #[arg(long, short = 'k', conflicts_with = "passphrase")]
    key_file: Option<PathBuf>,

    /// Derive the key from a passphrase (DBCRYPT_PASSPHRASE or prompt)
    #[arg(long)]
    passphrase: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DbcryptConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or_else(|| config.log.format.into());
    init_logging(&level, format);

    match cli.command {
        Commands::Encrypt { input, output, key } => cmd_encrypt(&config, &input, &output, &key).await,
        Commands::Decrypt { input, output, key } => cmd_decrypt(&config, &input, &output, &key).await,
        Commands::Keygen { output, force } => cmd_keygen(&output, force),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Key resolution ────────────────────────────────────────────────────────────

/// Resolve the stream key: --key-file, then config key_file / key / key_env.
///
/// `encryption.enabled` is not consulted: running `encrypt` or `decrypt` is
/// itself the request to encrypt. The switch only governs callers that
/// encrypt conditionally (see `resolve_config_key`).
fn resolve_key(config: &DbcryptConfig, args: &KeyArgs) -> Result<StreamKey> {
    let mut sources = Vec::new();
    if let Some(path) = &args.key_file {
        sources.push(KeySource::KeyFile(path.clone()));
    }
    sources.extend(KeySource::from_config(&config.encryption));

    KeySource::resolve_first(&sources)
        .context("resolving encryption key")?
        .context(
            "no encryption key available\n\
             Pass --key-file, set encryption.key_file in the config, or export the key:\n\
             \texport DBBACKUP_ENCRYPTION_KEY=$(cat backup.key)",
        )
}

/// Passphrase from DBCRYPT_PASSPHRASE, else an interactive prompt.
/// Empty passphrases are rejected from either source.
fn read_passphrase(confirm: bool) -> Result<SecretString> {
    let passphrase = match std::env::var(PASSPHRASE_ENV) {
        Ok(value) => SecretString::from(value),
        Err(_) => prompt_passphrase(confirm)?,
    };
    if passphrase.expose_secret().is_empty() {
        anyhow::bail!("empty passphrase");
    }
    Ok(passphrase)
}

fn prompt_passphrase(confirm: bool) -> Result<SecretString> {
    let first = SecretString::from(
        rpassword::prompt_password("Passphrase: ").context("reading passphrase")?,
    );
    if confirm {
        let second = SecretString::from(
            rpassword::prompt_password("Confirm passphrase: ").context("reading passphrase")?,
        );
        if first.expose_secret() != second.expose_secret() {
            anyhow::bail!("passphrases do not match");
        }
    }
    Ok(first)
}

async fn derive_key(passphrase: SecretString, salt: [u8; dbcrypt_crypto::SALT_SIZE]) -> Result<StreamKey> {
    tokio::task::spawn_blocking(move || dbcrypt_crypto::derive_key(&passphrase, &salt))
        .await
        .context("key derivation task")
}

// ── `dbcrypt encrypt` ─────────────────────────────────────────────────────────

async fn cmd_encrypt(config: &DbcryptConfig, input: &Path, output: &Path, args: &KeyArgs) -> Result<()> {
    let stats = if args.passphrase {
        let passphrase = read_passphrase(true)?;
        let salt = dbcrypt_crypto::generate_salt().context("generating salt")?;
        let key = derive_key(passphrase, salt).await?;

        let stats = dbcrypt_crypto::encrypt_file_async(input, output, key.as_bytes())
            .await
            .with_context(|| format!("encrypting {}", input.display()))?;

        let meta_path = sidecar_path(output);
        EncryptionMetadata::new(&salt, &stats.starting_nonce)
            .write(&meta_path)
            .with_context(|| format!("writing metadata: {}", meta_path.display()))?;
        info!(path = %meta_path.display(), "wrote encryption metadata");
        stats
    } else {
        let key = resolve_key(config, args)?;
        dbcrypt_crypto::encrypt_file_async(input, output, key.as_bytes())
            .await
            .with_context(|| format!("encrypting {}", input.display()))?
    };

    print_summary("encrypted", input, output, &stats);
    Ok(())
}

// ── `dbcrypt decrypt` ─────────────────────────────────────────────────────────

async fn cmd_decrypt(config: &DbcryptConfig, input: &Path, output: &Path, args: &KeyArgs) -> Result<()> {
    let (key, expected_nonce) = if args.passphrase {
        let meta_path = sidecar_path(input);
        let meta = EncryptionMetadata::read(&meta_path)
            .with_context(|| format!("reading metadata: {}", meta_path.display()))?;
        let salt = meta.salt_bytes()?;
        let passphrase = read_passphrase(false)?;
        (derive_key(passphrase, salt).await?, Some(meta.nonce_bytes()?))
    } else {
        (resolve_key(config, args)?, None)
    };

    let stats = dbcrypt_crypto::decrypt_file_async(input, output, key.as_bytes())
        .await
        .with_context(|| {
            format!(
                "decrypting {} (partial output left at {})",
                input.display(),
                output.display()
            )
        })?;

    if let Some(nonce) = expected_nonce {
        if nonce != stats.starting_nonce {
            warn!(
                metadata = %sidecar_path(input).display(),
                "metadata nonce does not match the stream's starting nonce"
            );
        }
    }

    print_summary("decrypted", input, output, &stats);
    Ok(())
}

fn print_summary(verb: &str, input: &Path, output: &Path, stats: &StreamStats) {
    println!(
        "{verb} {} -> {} ({} bytes plaintext, {} bytes ciphertext, {} frames)",
        input.display(),
        output.display(),
        stats.plaintext_bytes,
        stats.ciphertext_bytes,
        stats.frames
    );
}

// ── `dbcrypt keygen` ──────────────────────────────────────────────────────────

fn cmd_keygen(output: &Path, force: bool) -> Result<()> {
    let key = dbcrypt_crypto::generate_key().context("generating key")?;
    write_key_file(output, &key, force)?;
    println!("wrote 256-bit key to {}", output.display());
    Ok(())
}

fn write_key_file(path: &Path, key: &StreamKey, force: bool) -> Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("creating key file: {}", path.display()))?;
    let hex = key.to_hex();
    file.write_all(hex.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .and_then(|_| file.sync_all())
        .with_context(|| format!("writing key file: {}", path.display()))
}

// ── `dbcrypt config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &DbcryptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    match dbcrypt_crypto::resolve_config_key(&config.encryption) {
        Ok(Some(_)) => println!("# Encryption key: resolved"),
        Ok(None) => println!("# Encryption key: not required (encryption disabled)"),
        Err(e) => println!("# Encryption key: {e}"),
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
