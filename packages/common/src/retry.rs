use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// What to do after a transient send failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The attempt ceiling is reached; the message fails terminally.
    Exhausted { attempts: u32 },
}

/// Bounded exponential backoff for transient gateway failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_ms: u64,
    max_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_ms: base_delay.as_millis() as u64,
            max_ms: max_delay.as_millis() as u64,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide after the `attempts_made`-th attempt failed transiently.
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made < self.max_attempts {
            RetryDecision::Retry {
                attempt: attempts_made,
                delay: calculate_backoff(attempts_made, self.base_ms, self.max_ms),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: attempts_made,
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.base_delay_secs),
            Duration::from_secs(config.max_delay_secs),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    let total_delay = delay_ms.saturating_add(jitter).min(max_ms);
    Duration::from_millis(total_delay)
}
