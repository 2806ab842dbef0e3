//! # configs
//!
//! Layered runtime settings: built-in defaults, then an optional
//! `techconnect.toml`, then `TECHCONNECT_*` environment variables
//! (`__` separates nested keys, e.g. `TECHCONNECT_STORE__BACKEND=sqlite`).
//! A `.env` file is loaded into the environment first when present.

use std::time::Duration;

use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

const ENV_PREFIX: &str = "TECHCONNECT";
const CONFIG_FILE: &str = "techconnect";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("error loading configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Only read by the `sqlite` backend.
    #[serde(deserialize_with = "secret_string")]
    pub database_url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionSettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl TransactionSettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListingSettings {
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub transactions: TransactionSettings,
    pub listing: ListingSettings,
    pub log: LogSettings,
}

fn secret_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

fn defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("store.backend", "memory")?
        .set_default("store.database_url", "sqlite://techconnect.db")?
        .set_default("store.max_connections", 5)?
        .set_default("transactions.max_attempts", 5)?
        .set_default("transactions.initial_backoff_ms", 5)?
        .set_default("transactions.max_backoff_ms", 200)?
        .set_default("listing.page_size", 20)?
        .set_default("log.filter", "info")?
        .set_default("log.json", false)?)
}

/// The `TECHCONNECT_*` environment source.
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// Loads `.env`, then layers defaults, `techconnect.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv() {
            if err.not_found() {
                debug!("no .env file found");
            } else {
                return Err(err.into());
            }
        }
        Self::from_sources(environment())
    }

    /// Defaults, the optional config file, then `env`.
    pub fn from_sources(env: Environment) -> Result<Self, ConfigError> {
        let settings: Settings = defaults(Config::builder())?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.max_connections == 0 {
            return Err(ConfigError::Invalid("store.max_connections must be at least 1".into()));
        }
        if self.transactions.max_attempts == 0 {
            return Err(ConfigError::Invalid("transactions.max_attempts must be at least 1".into()));
        }
        if self.transactions.initial_backoff_ms > self.transactions.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "transactions.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.transactions.initial_backoff_ms, self.transactions.max_backoff_ms
            )));
        }
        if self.listing.page_size == 0 {
            return Err(ConfigError::Invalid("listing.page_size must be at least 1".into()));
        }
        Ok(())
    }
}
