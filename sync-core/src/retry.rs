//! Retry backoff and flush scheduling.
//!
//! Backoff for attempt `n` (0-indexed) is `min(2^n * base, max)`: with the
//! defaults 1s, 2s, 4s, 8s, 16s, then 30s forever. No jitter, so delays are
//! reproducible in tests.

use std::time::Duration;

use optisync_types::EventId;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default upper bound for any retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default gap between consecutive submissions of a flush.
pub const DEFAULT_FLUSH_STAGGER: Duration = Duration::from_millis(100);

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay for attempt 0.
    pub base_delay: Duration,
    /// Cap applied to every delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with explicit base and cap.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retrying an event that has already been retried
    /// `attempt` times.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = duration_ms(self.base_delay);
        let max_ms = duration_ms(self.max_delay);
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Offsets at which each event of a flush should be submitted.
///
/// The `i`-th event (in the given order) is submitted `i * stagger` after
/// the flush starts.
pub fn flush_schedule(ids: &[EventId], stagger: Duration) -> Vec<(EventId, Duration)> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let step = u32::try_from(i).unwrap_or(u32::MAX);
            (*id, stagger.saturating_mul(step))
        })
        .collect()
}
