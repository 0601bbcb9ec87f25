//! Exponential backoff for failed jobs.

use chrono::{DateTime, TimeDelta, Utc};

/// Delay in seconds before retry number `attempts`: `base ^ attempts`.
///
/// Saturates at `u64::MAX` instead of overflowing.
pub fn delay_seconds(base: u64, attempts: u32) -> u64 {
    base.checked_pow(attempts).unwrap_or(u64::MAX)
}

/// Backoff policy consulted by the worker after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: u64,
}

impl BackoffPolicy {
    pub fn new(base: u64) -> Self {
        Self { base }
    }

    /// Delay for the attempt that just failed (post-increment count).
    pub fn delay_seconds(&self, attempts: u32) -> u64 {
        delay_seconds(self.base, attempts)
    }

    /// `now + delay`, clamped to the latest representable timestamp.
    pub fn next_available_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let secs = i64::try_from(self.delay_seconds(attempts)).unwrap_or(i64::MAX);
        TimeDelta::try_seconds(secs)
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}
