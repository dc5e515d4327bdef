//! Retry policy: bounded attempts, exponential backoff, uniform jitter, cap.

use crate::config::QueueSettings;
use rand::Rng;
use std::time::Duration;

/// How many times a transient failure is retried and how long to wait.
///
/// The n-th retry (n starting at 1) waits `backoff_base^n` seconds plus a
/// uniform jitter in `[0, jitter_max]`, never more than `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    pub backoff_base: f64,
    pub max_delay: Duration,
    pub jitter_max: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            max_retry_attempts: settings.max_retry_attempts,
            backoff_base: settings.backoff_base,
            max_delay: settings.maximum_delay(),
            jitter_max: settings.jitter_max(),
        }
    }

    /// May another attempt follow, given `retries_done` retries so far?
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retry_attempts
    }

    /// Delay before retry `retry`, without jitter, capped at `max_delay`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.backoff_base.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else if secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay before retry `retry` with a freshly sampled jitter.
    pub fn delay(&self, retry: u32) -> Duration {
        self.delay_with_jitter(retry, self.sample_jitter())
    }

    /// Delay before retry `retry` with the given jitter, capped at `max_delay`.
    pub fn delay_with_jitter(&self, retry: u32, jitter: Duration) -> Duration {
        self.base_delay(retry)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter_max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}
