//! Dispatch tuning: retry bounds and per-call timeout.

use std::num::NonZeroU32;
use std::time::Duration;

use serde::Deserialize;

use super::retry::RetryPolicy;

pub(crate) const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 200;
pub(crate) const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 5_000;
pub(crate) const DEFAULT_CALL_TIMEOUT_MS: u64 = 3_000;

/// Dispatcher configuration, usually built from the `[dispatch]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum calls per (target, backend) pair, including the first.
    pub retry_max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub retry_backoff_base_ms: u64,
    /// Upper bound for any single backoff delay.
    pub retry_backoff_max_ms: u64,
    /// Hard limit for one backend call.
    pub call_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_backoff_base_ms: DEFAULT_RETRY_BACKOFF_BASE_MS,
            retry_backoff_max_ms: DEFAULT_RETRY_BACKOFF_MAX_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl From<&crate::config::DispatchSettings> for DispatchConfig {
    fn from(settings: &crate::config::DispatchSettings) -> Self {
        Self {
            retry_max_attempts: settings.retry_max_attempts.get(),
            retry_backoff_base_ms: settings.retry_backoff_base.as_millis() as u64,
            retry_backoff_max_ms: settings.retry_backoff_max.as_millis() as u64,
            call_timeout_ms: settings.call_timeout.as_millis() as u64,
        }
    }
}

impl DispatchConfig {
    /// Maximum attempts, clamping to 1 if zero.
    pub fn max_attempts_non_zero(&self) -> NonZeroU32 {
        NonZeroU32::new(self.retry_max_attempts).unwrap_or(NonZeroU32::MIN)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts_non_zero(),
            base_delay: Duration::from_millis(self.retry_backoff_base_ms),
            max_delay: Duration::from_millis(self.retry_backoff_max_ms),
            multiplier: 2.0,
        }
    }
}
