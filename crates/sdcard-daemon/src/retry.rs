//! Mount retry policy and attempt counting.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Highest accepted `max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 16;

/// Bounded exponential backoff for transient mount failures.
///
/// The delay after failed attempt `n` is
/// `min(initial_backoff * multiplier^(n - 1), max_backoff)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per insertion before settling in `MountFailed`.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(with = "crate::config::duration_ms")]
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "crate::config::duration_ms")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.max_attempts) {
            return Err(ConfigError::invalid_field(
                "retry.max_attempts",
                format!("must be between 1 and {MAX_ATTEMPTS_LIMIT}"),
            ));
        }
        if self.multiplier == 0 {
            return Err(ConfigError::invalid_field(
                "retry.multiplier",
                "must be at least 1",
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::invalid_field(
                "retry.initial_backoff",
                "must not exceed retry.max_backoff",
            ));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Attempts made for the current insertion.
///
/// Reset on every successful mount and on every return to `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    attempts: u32,
    max_attempts: u32,
}

impl RetryCounter {
    /// Create a counter bounded by `max_attempts`.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    /// Record an attempt and return its 1-based number.
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1).min(self.max_attempts);
        self.attempts
    }

    /// Attempts recorded so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Clear the counter.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
