//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Connection strings are wrapped in secrecy::SecretString to prevent log leaks.

pub mod queue;
pub mod secrets;

pub use queue::QueueSettings;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::Path;

#[derive(Debug)]
pub struct Config {
    pub redis_url: SecretString,
    /// Postgres URL for the dead-letter store. Optional for producers.
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub queue: QueueSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    ///
    /// Queue settings start from defaults, are replaced by the TOML file
    /// named in `WORKQ_CONFIG` when set, then patched by `WORKQ_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut queue = match std::env::var("WORKQ_CONFIG") {
            Ok(path) => QueueSettings::from_file(Path::new(&path))?,
            Err(_) => QueueSettings::default(),
        };
        queue.apply_env_overrides()?;
        queue.validate()?;

        Ok(Self {
            redis_url: SecretString::from(required_var("REDIS_URL")?),
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            queue,
        })
    }

    /// The dead-letter database URL, or a config error naming the missing var.
    pub fn require_database_url(&self) -> Result<&SecretString> {
        self.database_url.as_ref().ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
