//! Reconnect pacing for the message bus.
//!
//! [`Backoff`] is an infinite iterator of delays that doubles from an initial
//! value up to a ceiling. Callers [`reset`](Backoff::reset) it after a
//! successful connection so the next outage starts short again.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::protocol_constants::{RECONNECT_INITIAL_MS, RECONNECT_MAX_MS};

/// Exponential backoff (1s, 2s, 4s… capped) as a lazy, never-ending sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    ///
    /// `max` is raised to `initial` if given smaller.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            next: initial,
        }
    }

    /// Restarts the sequence from the initial delay.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(RECONNECT_INITIAL_MS),
            Duration::from_millis(RECONNECT_MAX_MS),
        )
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
///
/// Returns `false` if the sleep was cut short by cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|&s| Duration::from_secs(s)).collect()
    }

    #[test]
    fn doubles_until_capped() {
        let delays: Vec<_> = Backoff::default().take(8).collect();
        assert_eq!(delays, secs(&[1, 2, 4, 8, 16, 30, 30, 30]));
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::default();
        backoff.by_ref().take(4).for_each(drop);
        backoff.reset();
        assert_eq!(backoff.next(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn never_ends() {
        assert_eq!(Backoff::default().take(1000).count(), 1000);
    }

    #[test]
    fn max_below_initial_is_raised() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.next(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cut_short_by_cancellation() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        assert!(!sleep_or_cancel(Duration::from_secs(60), &cancel).await);
        assert!(sleep_or_cancel(Duration::from_millis(1), &CancellationToken::new()).await);
    }
}
