//! Time-windowed series: an append-only list of timestamped samples.
//!
//! Samples are kept in insertion order. Each `add` prunes samples that have
//! fallen out of the retention window, but always keeps the newest
//! `min_expired` of the expired ones: the most recent expired sample is the
//! value that was in effect when the window opened, and without it a query
//! could not tell "flat for the whole window" apart from "no data yet".

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// A single immutable `(timestamp, value)` observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<T> {
    pub timestamp: Instant,
    pub value: T,
}

/// Insertion-ordered samples with retention-based pruning.
#[derive(Debug, Clone)]
pub struct TimeWindowedSeries<T> {
    samples: VecDeque<Sample<T>>,
    /// How far back samples are retained (relative to the newest `add`).
    retention: Duration,
    /// Expired samples kept as window-start boundaries.
    min_expired: usize,
}

impl<T: Copy> TimeWindowedSeries<T> {
    /// Create a series that retains `retention` of history plus one expired
    /// boundary sample.
    pub fn new(retention: Duration) -> Self {
        Self::with_min_expired(retention, 1)
    }

    pub fn with_min_expired(retention: Duration, min_expired: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            retention,
            min_expired,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Change the retention window. Takes effect on the next `add`.
    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample stamped with the current time.
    pub fn add(&mut self, value: T) {
        self.add_at(value, Instant::now());
    }

    /// Append a sample with an explicit timestamp and prune relative to it.
    pub fn add_at(&mut self, value: T, timestamp: Instant) {
        self.samples.push_back(Sample { timestamp, value });
        self.prune(timestamp);
    }

    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return;
        };
        let expired = self
            .samples
            .iter()
            .take_while(|s| s.timestamp < cutoff)
            .count();
        let to_prune = expired.saturating_sub(self.min_expired);
        self.samples.drain(..to_prune);
    }

    /// Samples relevant to the window `(now - window, now]`.
    ///
    /// Returns every retained sample newer than the window start, preceded by
    /// the sample in effect at the start (the newest one at or before it) when
    /// the series keeps expired boundaries. An empty result means no data at
    /// all; callers decide what "insufficient coverage" means for them.
    pub fn values_in_window(&self, now: Instant, window: Duration) -> Vec<Sample<T>> {
        let start = now.checked_sub(window);
        let keep_boundary = self.min_expired > 0;
        let mut boundary = None;
        let mut result = Vec::new();

        for sample in &self.samples {
            match start {
                Some(start) if sample.timestamp < start => boundary = Some(*sample),
                Some(start) if sample.timestamp == start && keep_boundary => {
                    boundary = Some(*sample)
                }
                _ => result.push(*sample),
            }
        }

        if keep_boundary
            && let Some(b) = boundary
        {
            result.insert(0, b);
        }
        result
    }

    /// The newest sample, if any.
    pub fn latest(&self) -> Option<Sample<T>> {
        self.samples.back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn values(samples: &[Sample<i64>]) -> Vec<i64> {
        samples.iter().map(|s| s.value).collect()
    }

    #[test]
    fn empty_series_returns_nothing() {
        let series: TimeWindowedSeries<i64> = TimeWindowedSeries::new(ms(100));
        assert!(series.values_in_window(Instant::now(), ms(100)).is_empty());
        assert!(series.latest().is_none());
    }

    #[test]
    fn window_includes_boundary_sample() {
        let t0 = Instant::now();
        let mut series = TimeWindowedSeries::new(ms(1000));
        series.add_at(1, t0);
        series.add_at(2, t0 + ms(100));
        series.add_at(3, t0 + ms(200));
        series.add_at(4, t0 + ms(300));

        // Window opens at t0+150: sample 2 is the value in effect at that point.
        let window = series.values_in_window(t0 + ms(300), ms(150));
        assert_eq!(values(&window), vec![2, 3, 4]);
    }

    #[test]
    fn zero_window_returns_latest_value() {
        let t0 = Instant::now();
        let mut series = TimeWindowedSeries::new(ms(0));
        series.add_at(7, t0);
        series.add_at(9, t0 + ms(10));

        let window = series.values_in_window(t0 + ms(50), ms(0));
        assert_eq!(values(&window), vec![9]);
    }

    #[test]
    fn sample_at_window_start_replaces_older_boundary() {
        let t0 = Instant::now();
        let mut series = TimeWindowedSeries::new(ms(0));
        series.add_at(3, t0);
        series.add_at(4, t0);
        series.add_at(6, t0);

        let window = series.values_in_window(t0, ms(0));
        assert_eq!(values(&window), vec![6]);
    }

    #[test]
    fn query_does_not_mutate() {
        let t0 = Instant::now();
        let mut series = TimeWindowedSeries::new(ms(1000));
        series.add_at(1, t0);
        series.add_at(2, t0 + ms(10));

        let first = series.values_in_window(t0 + ms(500), ms(5));
        let second = series.values_in_window(t0 + ms(500), ms(5));
        assert_eq!(first, second);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn prunes_expired_but_keeps_one_boundary() {
        let t0 = Instant::now();
        let mut series = TimeWindowedSeries::new(ms(100));
        for i in 0..5 {
            series.add_at(i, t0 + ms(i as u64 * 10));
        }
        assert_eq!(series.len(), 5);

        // Cutoff t0+400: all earlier samples expired, newest expired one kept.
        series.add_at(99, t0 + ms(500));
        assert_eq!(series.len(), 2);
        let window = series.values_in_window(t0 + ms(500), ms(100));
        assert_eq!(values(&window), vec![4, 99]);
    }

    #[test]
    fn min_expired_zero_drops_everything_old() {
        let t0 = Instant::now();
        let mut series = TimeWindowedSeries::with_min_expired(ms(100), 0);
        series.add_at(1, t0);
        series.add_at(2, t0 + ms(500));
        assert_eq!(series.len(), 1);
        assert_eq!(values(&series.values_in_window(t0 + ms(500), ms(50))), vec![2]);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let t0 = Instant::now();
        let mut series = TimeWindowedSeries::new(ms(100));
        series.add_at(3, t0);
        series.add_at(1, t0);
        series.add_at(2, t0);
        assert_eq!(values(&series.values_in_window(t0, ms(100))), vec![3, 1, 2]);
        assert_eq!(series.latest().map(|s| s.value), Some(2));
    }

    #[test]
    fn shrinking_retention_applies_on_next_add() {
        let t0 = Instant::now();
        let mut series = TimeWindowedSeries::new(ms(1000));
        series.add_at(1, t0);
        series.add_at(2, t0 + ms(100));
        series.add_at(3, t0 + ms(200));

        series.set_retention(ms(10));
        assert_eq!(series.len(), 3);
        series.add_at(4, t0 + ms(300));
        assert_eq!(values(&series.values_in_window(t0 + ms(300), ms(1000))), vec![3, 4]);
    }
}
