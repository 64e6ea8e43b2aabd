//! Stability analysis over a history of desired pool sizes.
//!
//! # Windows
//!
//! Two windows are cut from the same history: the grow window (length
//! `resize_up_stabilization_delay`) and the shrink window (length
//! `resize_down_stabilization_delay`).
//!
//! ```text
//! max_desired = min(grow window)    // smallest size requested for the whole grow delay
//! min_desired = max(shrink window)  // largest size requested for the whole shrink delay
//!
//! current < max_desired  → grow to max_desired
//! current > min_desired  → shrink to min_desired
//! otherwise              → stay
//! ```
//!
//! A window not fully covered by history yields `i64::MIN` as its min and
//! `i64::MAX` as its max, so neither branch fires until enough data exists.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::PoolLimits;
use crate::series::{Sample, TimeWindowedSeries};

/// Summary of one window of the size history. Recomputed on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSummary {
    /// Newest value in the window, if there is one.
    pub latest: Option<i64>,
    /// Minimum over the window, or `i64::MIN` if the window is not covered.
    pub min: i64,
    /// Maximum over the window, or `i64::MAX` if the window is not covered.
    pub max: i64,
    pub stable_for_growth: bool,
    pub stable_for_shrink: bool,
}

impl WindowSummary {
    fn from_window(window: &[Sample<i64>], start: Option<Instant>) -> Self {
        let covered = match (window.first(), start) {
            (Some(first), Some(start)) => first.timestamp <= start,
            _ => false,
        };

        let (min, max) = if covered {
            window.iter().fold((i64::MAX, i64::MIN), |(lo, hi), s| {
                (lo.min(s.value), hi.max(s.value))
            })
        } else {
            (i64::MIN, i64::MAX)
        };

        // Flat windows only. The controller re-checks unstable windows at the
        // debounce period until they settle.
        let stable = min == max;
        Self {
            latest: window.last().map(|s| s.value),
            min,
            max,
            stable_for_growth: stable,
            stable_for_shrink: stable,
        }
    }
}

/// A history of requested pool sizes.
#[derive(Debug, Clone)]
pub struct SizeHistory {
    series: TimeWindowedSeries<i64>,
}

impl SizeHistory {
    /// Create a history retaining `window` of samples.
    pub fn new(window: Duration) -> Self {
        Self {
            series: TimeWindowedSeries::new(window),
        }
    }

    pub fn window(&self) -> Duration {
        self.series.retention()
    }

    pub fn set_window(&mut self, window: Duration) {
        self.series.set_retention(window);
    }

    pub fn record(&mut self, size: i64) {
        self.series.add(size);
    }

    pub fn record_at(&mut self, size: i64, at: Instant) {
        self.series.add_at(size, at);
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Raw samples relevant to a window ending at `now`.
    pub fn values_in_window(&self, now: Instant, window: Duration) -> Vec<Sample<i64>> {
        self.series.values_in_window(now, window)
    }

    /// Summarize the window `(now - window, now]`.
    pub fn summarize_window(&self, now: Instant, window: Duration) -> WindowSummary {
        let samples = self.series.values_in_window(now, window);
        WindowSummary::from_window(&samples, now.checked_sub(window))
    }
}

/// The size the pool should be, and whether that answer will hold if no
/// further samples arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizeDecision {
    pub desired_size: u32,
    pub stable: bool,
}

/// Decide the desired pool size from the history of requested sizes.
///
/// Growth is checked first, so a sustained request to grow always wins over a
/// pending shrink.
pub fn evaluate(
    current_size: u32,
    history: &SizeHistory,
    grow_delay: Duration,
    shrink_delay: Duration,
    limits: PoolLimits,
    now: Instant,
) -> PoolSizeDecision {
    let shrink = history.summarize_window(now, shrink_delay);
    let grow = history.summarize_window(now, grow_delay);

    // Sustained growth value: smallest size requested throughout the grow window.
    let max_desired = grow.min;
    // Sustained shrink value: largest size requested throughout the shrink window.
    let min_desired = shrink.max;

    let current = i64::from(current_size);
    let (desired, stable) = if current < max_desired {
        (max_desired, grow.stable_for_growth)
    } else if current > min_desired {
        (min_desired, shrink.stable_for_shrink)
    } else {
        (current, grow.stable_for_growth && shrink.stable_for_shrink)
    };

    let desired_size = limits.clamp_i64(desired);
    trace!(
        current = current_size,
        desired = desired_size,
        min_desired,
        max_desired,
        stable,
        ?grow,
        ?shrink,
        "calculated desired pool size"
    );

    PoolSizeDecision {
        desired_size,
        stable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn unbounded() -> PoolLimits {
        PoolLimits::new(0, u32::MAX)
    }

    fn history_of(t0: Instant, entries: &[(u64, i64)]) -> SizeHistory {
        let mut history = SizeHistory::new(ms(10_000));
        for &(offset, size) in entries {
            history.record_at(size, t0 + ms(offset));
        }
        history
    }

    #[test]
    fn uncovered_window_uses_sentinels() {
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 5)]);
        let summary = history.summarize_window(t0 + ms(100), ms(1000));
        assert_eq!(summary.min, i64::MIN);
        assert_eq!(summary.max, i64::MAX);
        assert_eq!(summary.latest, Some(5));
        assert!(!summary.stable_for_growth);
        assert!(!summary.stable_for_shrink);
    }

    #[test]
    fn empty_history_is_not_covered() {
        let history = SizeHistory::new(ms(100));
        let summary = history.summarize_window(Instant::now(), ms(0));
        assert_eq!(summary.latest, None);
        assert_eq!((summary.min, summary.max), (i64::MIN, i64::MAX));
    }

    #[test]
    fn covered_flat_window_is_stable() {
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 5), (100, 5), (200, 5)]);
        let summary = history.summarize_window(t0 + ms(250), ms(200));
        assert_eq!((summary.min, summary.max), (5, 5));
        assert!(summary.stable_for_growth && summary.stable_for_shrink);
    }

    #[test]
    fn grows_when_whole_grow_window_agrees() {
        // Grow window [5, 5, 5] covers its delay; shrink window has no coverage.
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 5), (100, 5), (200, 5)]);
        let decision = evaluate(3, &history, ms(200), ms(5000), unbounded(), t0 + ms(200));
        assert_eq!(
            decision,
            PoolSizeDecision {
                desired_size: 5,
                stable: true
            }
        );
    }

    #[test]
    fn does_not_grow_before_delay_elapses() {
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 8)]);
        let decision = evaluate(3, &history, ms(500), ms(0), unbounded(), t0 + ms(100));
        assert_eq!(decision.desired_size, 3);
        assert!(!decision.stable);
    }

    #[test]
    fn grows_to_smallest_sustained_request() {
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 6), (100, 9), (200, 7)]);
        let decision = evaluate(2, &history, ms(300), ms(0), unbounded(), t0 + ms(300));
        assert_eq!(decision.desired_size, 6);
        assert!(!decision.stable);
    }

    #[test]
    fn mixed_shrink_requests_block_shrinking_below_max() {
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 2), (100, 4), (200, 3)]);
        let decision = evaluate(10, &history, ms(0), ms(300), unbounded(), t0 + ms(300));
        assert_eq!(decision.desired_size, 4);
        assert!(!decision.stable);
    }

    #[test]
    fn shrink_waits_for_full_coverage() {
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 2), (100, 2)]);
        let decision = evaluate(10, &history, ms(0), ms(1000), unbounded(), t0 + ms(200));
        assert_eq!(decision.desired_size, 10);
        assert!(!decision.stable);

        let later = evaluate(10, &history, ms(0), ms(1000), unbounded(), t0 + ms(1000));
        assert_eq!(later.desired_size, 2);
        assert!(later.stable);
    }

    #[test]
    fn growth_wins_over_pending_shrink() {
        let t0 = Instant::now();
        // The short grow window only sees the request for 8.
        let history = history_of(t0, &[(0, 4), (900, 8)]);
        let decision = evaluate(6, &history, ms(50), ms(1000), unbounded(), t0 + ms(1000));
        assert_eq!(decision.desired_size, 8);
    }

    #[test]
    fn no_change_is_stable_only_if_both_windows_flat() {
        let t0 = Instant::now();
        let flat = history_of(t0, &[(0, 4)]);
        let decision = evaluate(4, &flat, ms(100), ms(100), unbounded(), t0 + ms(100));
        assert_eq!(
            decision,
            PoolSizeDecision {
                desired_size: 4,
                stable: true
            }
        );

        let choppy = history_of(t0, &[(0, 3), (50, 5)]);
        let decision = evaluate(4, &choppy, ms(100), ms(100), unbounded(), t0 + ms(100));
        assert_eq!(
            decision,
            PoolSizeDecision {
                desired_size: 4,
                stable: false
            }
        );
    }

    #[test]
    fn decision_is_clamped_to_limits() {
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 50)]);
        let decision = evaluate(2, &history, ms(0), ms(0), PoolLimits::new(1, 10), t0);
        assert_eq!(decision.desired_size, 10);

        let history = history_of(t0, &[(0, 0)]);
        let decision = evaluate(5, &history, ms(0), ms(0), PoolLimits::new(3, 10), t0);
        assert_eq!(decision.desired_size, 3);
    }

    #[test]
    fn repeated_evaluation_is_idempotent() {
        let t0 = Instant::now();
        let history = history_of(t0, &[(0, 7)]);
        let first = evaluate(7, &history, ms(0), ms(0), unbounded(), t0 + ms(10));
        let second = evaluate(7, &history, ms(0), ms(0), unbounded(), t0 + ms(10));
        assert_eq!(first, second);
        assert_eq!(first.desired_size, 7);
    }
}
