//! Retry policy for transient ledger conflicts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff for retrying a movement after a concurrency conflict
/// (lock wait timeout or stale version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = fail on the first conflict).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_backoff: Duration,
    /// Delay cap.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn exponential(max_retries: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_backoff,
        }
    }

    /// Delay before retry number `retry` (1-indexed): `base * 2^(retry-1)`,
    /// capped at `max_backoff`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let pow = 1u32 << retry.saturating_sub(1).min(16);
        self.base_backoff
            .checked_mul(pow)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}
