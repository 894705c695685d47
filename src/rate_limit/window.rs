//! Sliding Window
//!
//! Timestamp log for a single (category, key) pair.

use std::collections::VecDeque;

/// Default rolling window length
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Ordered log of recent request timestamps (epoch milliseconds)
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    timestamps: VecDeque<u64>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `now`, drop everything that aged out, and return the count left.
    ///
    /// The push happens before pruning, so the returned count always
    /// includes the current attempt whether or not the caller accepts it.
    pub fn record(&mut self, now: u64, window_ms: u64) -> usize {
        self.timestamps.push_back(now);
        self.prune(now, window_ms);
        self.timestamps.len()
    }

    /// Drop entries that are `window_ms` or more older than `now`.
    pub fn prune(&mut self, now: u64, window_ms: u64) {
        self.timestamps
            .retain(|&ts| now.saturating_sub(ts) < window_ms);
    }

    /// Number of entries still inside the window at `now`, without mutating.
    pub fn count_at(&self, now: u64, window_ms: u64) -> usize {
        self.timestamps
            .iter()
            .filter(|&&ts| now.saturating_sub(ts) < window_ms)
            .count()
    }

    /// Oldest timestamp still held
    pub fn oldest(&self) -> Option<u64> {
        self.timestamps.front().copied()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.timestamps.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_current_attempt() {
        let mut window = SlidingWindow::new();
        assert_eq!(window.record(0, DEFAULT_WINDOW_MS), 1);
        assert_eq!(window.record(10, DEFAULT_WINDOW_MS), 2);
    }

    #[test]
    fn test_exactly_window_old_is_pruned() {
        let mut window = SlidingWindow::new();
        window.record(0, DEFAULT_WINDOW_MS);
        window.record(1, DEFAULT_WINDOW_MS);

        // t=0 is exactly 60_000ms old, t=1 is 59_999ms old
        assert_eq!(window.record(60_000, DEFAULT_WINDOW_MS), 2);
        assert_eq!(window.timestamps().collect::<Vec<_>>(), vec![1, 60_000]);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut window = SlidingWindow::new();
        for ts in [5, 7, 9, 11] {
            window.record(ts, 100);
        }
        assert_eq!(window.timestamps().collect::<Vec<_>>(), vec![5, 7, 9, 11]);
        assert_eq!(window.oldest(), Some(5));
    }

    #[test]
    fn test_count_at_does_not_mutate() {
        let mut window = SlidingWindow::new();
        window.record(0, 1_000);
        window.record(500, 1_000);

        assert_eq!(window.count_at(1_000, 1_000), 1);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_prune_all() {
        let mut window = SlidingWindow::new();
        window.record(0, 1_000);
        window.prune(5_000, 1_000);
        assert!(window.is_empty());
    }
}
