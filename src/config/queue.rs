//! Queue settings: list naming, retry budget, backoff ceiling, loop pacing.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Largest retry budget the dead-letter store can record (an `INTEGER`).
pub const MAX_RETRY_ATTEMPTS_LIMIT: u32 = i32::MAX as u32;

/// Immutable queue configuration, loaded once at process start.
///
/// File keys use the PascalCase names operators already know
/// (`OriginQueueName`, `MaxRetryAttempts`, `MaximumDelayInSec`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct QueueSettings {
    /// Prefix of every physical list: `{origin_queue_name}:{type name}`.
    pub origin_queue_name: String,
    /// Retries after the initial attempt. 0 means "try once".
    pub max_retry_attempts: u32,
    /// Ceiling on a single retry delay, jitter included.
    pub maximum_delay_in_sec: u64,
    /// Exponential base: the n-th retry waits `backoff_base^n` seconds.
    pub backoff_base: f64,
    /// Upper bound of the uniform jitter added to each retry delay.
    pub jitter_max_ms: u64,
    /// Sleep after observing an empty list.
    pub idle_poll_interval_ms: u64,
    /// Sleep after each processed envelope.
    pub throttle_interval_ms: u64,
    /// Sleep after a failed liveness probe before probing again.
    pub liveness_backoff_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            origin_queue_name: "the_queue".to_string(),
            max_retry_attempts: 0,
            maximum_delay_in_sec: 90,
            backoff_base: 2.0,
            jitter_max_ms: 1_000,
            idle_poll_interval_ms: 1_000,
            throttle_interval_ms: 10_000,
            liveness_backoff_ms: 5_000,
        }
    }
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    queue: QueueSettings,
}

impl QueueSettings {
    /// Parse the `[queue]` table of a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: SettingsFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad queue config: {e}")))?;
        file.queue.validate()?;
        Ok(file.queue)
    }

    /// Load the `[queue]` table from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read queue config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Patch fields from `WORKQ_*` environment variables, when present.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var("WORKQ_ORIGIN_QUEUE_NAME") {
            self.origin_queue_name = name;
        }
        if let Some(n) = parse_var("WORKQ_MAX_RETRY_ATTEMPTS")? {
            self.max_retry_attempts = n;
        }
        if let Some(n) = parse_var("WORKQ_MAXIMUM_DELAY_IN_SEC")? {
            self.maximum_delay_in_sec = n;
        }
        if let Some(base) = parse_var("WORKQ_BACKOFF_BASE")? {
            self.backoff_base = base;
        }
        if let Some(n) = parse_var("WORKQ_JITTER_MAX_MS")? {
            self.jitter_max_ms = n;
        }
        if let Some(n) = parse_var("WORKQ_IDLE_POLL_INTERVAL_MS")? {
            self.idle_poll_interval_ms = n;
        }
        if let Some(n) = parse_var("WORKQ_THROTTLE_INTERVAL_MS")? {
            self.throttle_interval_ms = n;
        }
        if let Some(n) = parse_var("WORKQ_LIVENESS_BACKOFF_MS")? {
            self.liveness_backoff_ms = n;
        }
        Ok(())
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.origin_queue_name.is_empty() {
            return Err(Error::Config("OriginQueueName must not be empty".to_string()));
        }
        if self.max_retry_attempts > MAX_RETRY_ATTEMPTS_LIMIT {
            return Err(Error::Config(format!(
                "MaxRetryAttempts must be at most {MAX_RETRY_ATTEMPTS_LIMIT}, got {}",
                self.max_retry_attempts
            )));
        }
        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            return Err(Error::Config(format!(
                "BackoffBase must be a finite number >= 1, got {}",
                self.backoff_base
            )));
        }
        Ok(())
    }

    pub fn maximum_delay(&self) -> Duration {
        Duration::from_secs(self.maximum_delay_in_sec)
    }

    pub fn jitter_max(&self) -> Duration {
        Duration::from_millis(self.jitter_max_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn liveness_backoff(&self) -> Duration {
        Duration::from_millis(self.liveness_backoff_ms)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
