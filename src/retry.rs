//! Bounded retry policy for optimistic-concurrency conflicts.

use backon::ExponentialBuilder;
use std::time::Duration;

/// Retry policy applied when a record write hits a concurrent modification.
///
/// Only conflicts are retried. Every other failure is surfaced on the
/// first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub initial_backoff: Duration,

    /// Multiplier applied to the delay after each failed attempt.
    pub factor: u32,

    /// Upper bound for a single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy used for entitlement record writes: 5 attempts, 10ms doubling, capped at 1s.
    pub const fn conflict_default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            factor: 2,
            max_backoff: Duration::from_secs(1),
        }
    }

    /// Policy that never retries.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            factor: 1,
            max_backoff: Duration::ZERO,
        }
    }

    /// Exponential backoff for this policy.
    ///
    /// `max_attempts` counts the first try, backon counts retries only.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::new()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.factor as f32)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::conflict_default()
    }
}
