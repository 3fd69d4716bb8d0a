use crate::storage::lock::DEFAULT_LOCK_TIMEOUT;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub lock_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object storage service with per-object encryption")]
pub struct Args {
    /// Host to bind to (overrides VAULT_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VAULT_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Absolute directory where blobs are stored (overrides VAULT_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides VAULT_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Seconds to wait for an object lock (overrides VAULT_STORE_LOCK_TIMEOUT_SECS)
    #[arg(long)]
    pub lock_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment variables, which win over defaults.
    fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("VAULT_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("VAULT_STORE_PORT", 3000)?;
        let env_storage = env::var("VAULT_STORE_STORAGE_DIR")
            .unwrap_or_else(|_| "/var/lib/vault-store/objects".into());
        let env_db = env::var("VAULT_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:///var/lib/vault-store/meta/vault_store.db".into());
        let env_lock = env_number(
            "VAULT_STORE_LOCK_TIMEOUT_SECS",
            DEFAULT_LOCK_TIMEOUT.as_secs(),
        )?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            lock_timeout: Duration::from_secs(args.lock_timeout_secs.unwrap_or(env_lock)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_override_defaults() {
        let cfg = AppConfig::merge(Args {
            host: Some("127.0.0.1".into()),
            port: Some(8080),
            storage_dir: Some("/srv/blobs".into()),
            database_url: Some("sqlite::memory:".into()),
            lock_timeout_secs: Some(3),
            migrate: false,
        })
        .unwrap();

        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.storage_dir, "/srv/blobs");
        assert_eq!(cfg.lock_timeout, Duration::from_secs(3));
    }

    #[test]
    fn cli_parses_flags() {
        let args = Args::parse_from(["vault-store", "--port", "9000", "--migrate"]);
        assert_eq!(args.port, Some(9000));
        assert!(args.migrate);
        assert!(args.host.is_none());
    }
}
