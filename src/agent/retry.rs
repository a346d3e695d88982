//! Reconnect backoff.

use super::config::BackoffConfig;

/// Counts consecutive failed connection attempts and turns the count into a
/// delay.
///
/// The delay doubles with every failure, starting at the configured initial
/// value, and never exceeds the ceiling. Reaching `SessionActive` resets the
/// count.
///
/// ```rust
/// use iotlink::agent::RetryPolicy;
///
/// let mut retry = RetryPolicy::new(500, 4000);
/// retry.record_failure();
/// assert_eq!(retry.delay_ms(), 500);
/// retry.record_failure();
/// assert_eq!(retry.delay_ms(), 1000);
/// retry.reset();
/// assert_eq!(retry.attempts(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    initial_ms: u32,
    max_ms: u32,
}

impl RetryPolicy {
    /// A policy with no failures recorded.
    pub const fn new(initial_ms: u32, max_ms: u32) -> Self {
        Self {
            attempts: 0,
            initial_ms,
            max_ms,
        }
    }

    /// A policy using the configured bounds.
    pub const fn from_config(backoff: &BackoffConfig) -> Self {
        Self::new(backoff.initial_ms, backoff.max_ms)
    }

    /// Consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait before the next attempt.
    pub fn delay_ms(&self) -> u32 {
        let doublings = self.attempts.saturating_sub(1).min(31);
        let delay = u64::from(self.initial_ms) << doublings;
        delay.min(u64::from(self.max_ms)) as u32
    }

    /// Count one more failed attempt.
    pub fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Forget all failures.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
