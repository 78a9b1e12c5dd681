//! Bounded exponential backoff policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for dependency calls (market data, connectivity, state I/O).
///
/// A call is attempted once and then retried up to `max_retries` times,
/// waiting `base * 2^(retry-1)` (capped at `max_delay_ms`) before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// retry=1 -> base, retry=2 -> 2*base, retry=3 -> 4*base
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}
