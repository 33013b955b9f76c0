//! Retry policy: bounded exponential backoff for transient failures.

use std::num::NonZeroU32;
use std::time::Duration;

/// How often and how patiently a transient failure is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per pair, including the first call.
    pub max_attempts: NonZeroU32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: NonZeroU32::MIN,
            ..Self::default()
        }
    }

    /// Delay before the next call, given the number of attempts already made.
    ///
    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    /// With base 200ms: 200ms, 400ms, 800ms, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// Whether another call is allowed after `attempts` calls.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.get()
    }
}
