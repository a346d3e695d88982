//! Fixed-interval publish timer.

/// Decides when the next telemetry publish is due.
///
/// Publishes stay on a grid of `interval_ms` steps from the start time, so
/// tick jitter up to `slack_ms` does not accumulate into drift. A publish
/// that lands later than that restarts the grid at the publish itself, which
/// keeps consecutive publishes at least one interval apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishTimer {
    last_ms: u64,
    interval_ms: u64,
    slack_ms: u64,
}

impl PublishTimer {
    /// A timer whose first publish is due one interval after `now_ms`.
    ///
    /// `slack_ms` is clamped to the interval.
    pub fn new(interval_ms: u32, slack_ms: u32, now_ms: u64) -> Self {
        Self {
            last_ms: now_ms,
            interval_ms: u64::from(interval_ms),
            slack_ms: u64::from(slack_ms.min(interval_ms)),
        }
    }

    /// Whether a publish is due at `now_ms`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_ms) >= self.interval_ms
    }

    /// Record a publish attempt at `now_ms`.
    pub fn mark(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_ms);
        if elapsed >= self.interval_ms && elapsed < self.interval_ms + self.slack_ms {
            self.last_ms += self.interval_ms;
        } else {
            self.last_ms = now_ms;
        }
    }

    /// Time of the last recorded publish, on the grid.
    pub fn last_ms(&self) -> u64 {
        self.last_ms
    }
}
