//! Load-to-size translation.
//!
//! Turns a load observation into a proposed pool size. Two sources are
//! supported:
//!
//! - a continuous per-unit metric compared against the configured
//!   `metric_lower_bound`/`metric_upper_bound`;
//! - pool-hot/cold/ok events that carry their own workrate and thresholds.
//!
//! ```text
//! hot:   desired = ceil(size * metric / upper)
//! cold:  desired = floor(size * metric / lower), tightened to ceil(size * metric / upper)
//! event: desired = ceil(workrate / (threshold / size))
//! ```
//!
//! Every calculation assumes a homogeneous pool where each unit carries an
//! equal share of the work.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::{IterationStep, PolicyConfig};

/// Workrate snapshot published with a pool event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolUtilization {
    pub current_size: u32,
    pub current_workrate: f64,
    pub low_threshold: f64,
    pub high_threshold: f64,
}

/// A pool utilization notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolEvent {
    Hot(PoolUtilization),
    Cold(PoolUtilization),
    Ok(PoolUtilization),
}

impl PoolEvent {
    pub fn utilization(&self) -> &PoolUtilization {
        match self {
            PoolEvent::Hot(u) | PoolEvent::Cold(u) | PoolEvent::Ok(u) => u,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PoolEvent::Hot(_) => "hot",
            PoolEvent::Cold(_) => "cold",
            PoolEvent::Ok(_) => "ok",
        }
    }
}

/// Outcome of translating one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    /// Move the pool to `desired` (already clamped and stepped).
    Resize {
        current: u32,
        desired: u32,
        /// Size the load asks for, ignoring pool limits.
        unbounded: i64,
    },
    /// Keep the pool at `current`. Still recorded, so the stability window
    /// sees an explicit "no resize needed" rather than silence.
    Hold {
        current: u32,
        unbounded: Option<i64>,
    },
}

impl Proposal {
    /// The size to append to the desired-size history.
    pub fn recorded_size(&self) -> u32 {
        match *self {
            Proposal::Resize { desired, .. } => desired,
            Proposal::Hold { current, .. } => current,
        }
    }

    pub fn unbounded(&self) -> Option<i64> {
        match *self {
            Proposal::Resize { unbounded, .. } => Some(unbounded),
            Proposal::Hold { unbounded, .. } => unbounded,
        }
    }

    pub fn is_resize(&self) -> bool {
        matches!(self, Proposal::Resize { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Grow,
    Shrink,
}

/// Translate a per-unit metric reading into a proposal.
pub fn translate_metric(config: &PolicyConfig, current_size: u32, metric: f64) -> Proposal {
    let lower = valid_bound(config.metric_lower_bound);
    let upper = valid_bound(config.metric_upper_bound);
    let total = f64::from(current_size) * metric;

    if let Some(upper) = upper
        && metric > upper
    {
        let unbounded = (total / upper).ceil() as i64;
        trace!(current = current_size, metric, upper, unbounded, "pool metric above upper bound");
        return shape(config, Direction::Grow, current_size, unbounded, None);
    }

    if let Some(lower) = lower
        && metric < lower
    {
        let mut unbounded = (total / lower).floor() as i64;
        if let Some(upper) = upper {
            // The smallest size that keeps per-unit load at or below the upper bound.
            let sustainable = (total / upper).ceil() as i64;
            if unbounded != sustainable {
                trace!(
                    current = current_size,
                    from = unbounded,
                    to = sustainable,
                    "tightening shrink candidate to prevent thrashing"
                );
                unbounded = sustainable;
            }
        }
        trace!(current = current_size, metric, lower, unbounded, "pool metric below lower bound");
        let load = upper.map(|upper| (total, upper));
        return shape(config, Direction::Shrink, current_size, unbounded, load);
    }

    trace!(
        current = current_size,
        metric,
        lower = ?config.metric_lower_bound,
        upper = ?config.metric_upper_bound,
        "pool metric within range"
    );
    Proposal::Hold {
        current: current_size,
        unbounded: None,
    }
}

/// Translate a pool-hot/cold/ok event into a proposal.
///
/// `current_workrate` is the pool's total workrate and the thresholds are
/// pool-wide, so `threshold / size` is the per-unit share.
///
/// A hot event can only grow the pool and a cold event can only shrink it;
/// a computation pointing the other way is recorded as a hold. So is an event
/// whose threshold is not a positive finite number, or whose pool is empty.
pub fn translate_pool_event(config: &PolicyConfig, event: &PoolEvent) -> Proposal {
    let u = event.utilization();
    let size = f64::from(u.current_size);
    let hold = Proposal::Hold {
        current: u.current_size,
        unbounded: None,
    };

    if u.current_size == 0 || !u.current_workrate.is_finite() || u.current_workrate < 0.0 {
        trace!(kind = event.kind(), ?u, "ignoring pool event with unusable utilization");
        return hold;
    }

    match event {
        PoolEvent::Hot(_) => {
            let Some(high) = valid_bound(Some(u.high_threshold)) else {
                trace!(high = u.high_threshold, "ignoring hot pool event, invalid threshold");
                return hold;
            };
            let unbounded = (u.current_workrate / (high / size)).ceil() as i64;
            trace!(current = u.current_size, workrate = u.current_workrate, unbounded, "hot pool");
            shape(config, Direction::Grow, u.current_size, unbounded, None)
        }
        PoolEvent::Cold(_) => {
            let Some(low) = valid_bound(Some(u.low_threshold)) else {
                trace!(low = u.low_threshold, "ignoring cold pool event, invalid threshold");
                return hold;
            };
            let unbounded = (u.current_workrate / (low / size)).ceil() as i64;
            trace!(current = u.current_size, workrate = u.current_workrate, unbounded, "cold pool");
            // Event thresholds cover the whole pool; the per-unit ceiling is
            // what a shrunken pool would be held against.
            let per_unit_high = valid_bound(Some(u.high_threshold / size));
            shape(
                config,
                Direction::Shrink,
                u.current_size,
                unbounded,
                per_unit_high.map(|high| (u.current_workrate, high)),
            )
        }
        PoolEvent::Ok(_) => hold,
    }
}

fn valid_bound(bound: Option<f64>) -> Option<f64> {
    bound.filter(|b| b.is_finite() && *b > 0.0)
}

/// Clamp to pool limits, apply the iteration step for `direction`, and make
/// sure the result still moves the pool the intended way.
///
/// `load` is `(total activity, per-unit upper bound)`; when present, shrink
/// steps are backed off until they would not immediately trigger growth.
fn shape(
    config: &PolicyConfig,
    direction: Direction,
    current: u32,
    unbounded: i64,
    load: Option<(f64, f64)>,
) -> Proposal {
    let limits = config.limits;
    let clamped = limits.clamp_i64(unbounded);

    let desired = match direction {
        Direction::Grow if clamped > current => {
            let delta = step_delta(clamped - current, config.resize_up_step);
            limits.clamp(current.saturating_add(delta))
        }
        Direction::Shrink if clamped < current => {
            let step = config.resize_down_step;
            let delta = step_delta(current - clamped, step);
            let mut desired = current.saturating_sub(delta);
            if let Some((total, upper)) = load {
                while desired < current && total > upper * f64::from(desired) {
                    desired = desired.saturating_add(step.increment);
                }
            }
            limits.clamp(desired)
        }
        _ => current,
    };

    let moves = match direction {
        Direction::Grow => desired > current,
        Direction::Shrink => desired < current,
    };

    if moves {
        Proposal::Resize {
            current,
            desired,
            unbounded,
        }
    } else {
        trace!(
            current,
            desired,
            unbounded,
            ?direction,
            "resize blocked by pool limits or step checks"
        );
        Proposal::Hold {
            current,
            unbounded: Some(unbounded),
        }
    }
}

/// Cap `delta` at the step maximum, otherwise round it up to a multiple of
/// the step increment.
fn step_delta(delta: u32, step: IterationStep) -> u32 {
    if delta > step.max {
        step.max
    } else if delta % step.increment != 0 {
        delta.saturating_add(step.increment - delta % step.increment)
    } else {
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_config(lower: f64, upper: f64) -> PolicyConfig {
        PolicyConfig::default().with_metric_range(lower, upper)
    }

    fn util(size: u32, workrate: f64, low: f64, high: f64) -> PoolUtilization {
        PoolUtilization {
            current_size: size,
            current_workrate: workrate,
            low_threshold: low,
            high_threshold: high,
        }
    }

    #[test]
    fn scale_out_proportional_to_load() {
        let config = metric_config(50.0, 100.0);
        let proposal = translate_metric(&config, 2, 250.0);
        assert_eq!(
            proposal,
            Proposal::Resize {
                current: 2,
                desired: 5,
                unbounded: 5
            }
        );
    }

    #[test]
    fn scale_out_is_smallest_sufficient_size() {
        let config = metric_config(10.0, 100.0);
        for current in 1..20u32 {
            for metric in [101.0, 133.3, 150.0, 199.9, 250.0, 1000.0] {
                let desired = translate_metric(&config, current, metric).recorded_size();
                let need = f64::from(current) * metric;
                assert!(f64::from(desired) * 100.0 >= need, "{current} {metric}");
                assert!(f64::from(desired - 1) * 100.0 < need, "{current} {metric}");
            }
        }
    }

    #[test]
    fn shrink_candidate_is_tightened() {
        let config = metric_config(50.0, 100.0);
        let proposal = translate_metric(&config, 10, 10.0);
        assert_eq!(proposal.recorded_size(), 1);
        assert!(proposal.is_resize());
    }

    #[test]
    fn shrink_never_goes_below_sustainable_size() {
        // floor(95 / 50) = 1, but one unit would carry 95 > 60.
        let config = metric_config(50.0, 60.0);
        let proposal = translate_metric(&config, 5, 19.0);
        assert_eq!(proposal.recorded_size(), 2);
    }

    #[test]
    fn within_range_holds_current_size() {
        let config = metric_config(50.0, 100.0);
        assert_eq!(
            translate_metric(&config, 3, 75.0),
            Proposal::Hold {
                current: 3,
                unbounded: None
            }
        );
        // Bounds themselves are inside the range.
        assert!(!translate_metric(&config, 3, 100.0).is_resize());
        assert!(!translate_metric(&config, 3, 50.0).is_resize());
    }

    #[test]
    fn missing_bounds_never_resize() {
        let config = PolicyConfig::default();
        assert!(!translate_metric(&config, 3, 1e9).is_resize());
        assert!(!translate_metric(&config, 3, 0.0).is_resize());
    }

    #[test]
    fn scale_out_blocked_at_max_pool_size() {
        let config = metric_config(50.0, 100.0).with_pool_limits(0, 4);
        assert_eq!(
            translate_metric(&config, 4, 500.0),
            Proposal::Hold {
                current: 4,
                unbounded: Some(20)
            }
        );
        assert_eq!(translate_metric(&config, 2, 500.0).recorded_size(), 4);
    }

    #[test]
    fn scale_back_respects_min_pool_size() {
        let config = metric_config(50.0, 100.0).with_pool_limits(2, 10);
        assert_eq!(translate_metric(&config, 4, 0.0).recorded_size(), 2);
    }

    #[test]
    fn growth_rounds_up_to_increment() {
        let mut config = metric_config(50.0, 100.0);
        config.resize_up_step = IterationStep {
            increment: 4,
            max: u32::MAX,
        };
        // Wants 3 -> 5 (+2), rounded to +4.
        assert_eq!(translate_metric(&config, 3, 150.0).recorded_size(), 7);
    }

    #[test]
    fn growth_capped_by_iteration_max() {
        let mut config = metric_config(50.0, 100.0);
        config.resize_up_step = IterationStep {
            increment: 1,
            max: 3,
        };
        assert_eq!(translate_metric(&config, 2, 1000.0).recorded_size(), 5);
    }

    #[test]
    fn shrink_capped_by_iteration_max() {
        let mut config = metric_config(50.0, 100.0);
        config.resize_down_step = IterationStep {
            increment: 1,
            max: 2,
        };
        assert_eq!(translate_metric(&config, 10, 1.0).recorded_size(), 8);
    }

    #[test]
    fn hot_event_grows_pool() {
        let config = PolicyConfig::default();
        let event = PoolEvent::Hot(util(4, 300.0, 40.0, 200.0));
        // ceil(300 / (200 / 4)) = 6
        assert_eq!(translate_pool_event(&config, &event).recorded_size(), 6);
    }

    #[test]
    fn cold_event_shrinks_pool() {
        let config = PolicyConfig::default();
        let event = PoolEvent::Cold(util(10, 20.0, 100.0, 400.0));
        // ceil(20 / (100 / 10)) = 2
        let proposal = translate_pool_event(&config, &event);
        assert!(proposal.is_resize());
        assert_eq!(proposal.recorded_size(), 2);
    }

    #[test]
    fn cold_event_that_computes_growth_is_rejected() {
        let config = PolicyConfig::default();
        let event = PoolEvent::Cold(util(4, 100.0, 40.0, 200.0));
        assert_eq!(
            translate_pool_event(&config, &event),
            Proposal::Hold {
                current: 4,
                unbounded: Some(10)
            }
        );
    }

    #[test]
    fn hot_event_that_computes_shrink_is_rejected() {
        let config = PolicyConfig::default();
        let event = PoolEvent::Hot(util(10, 20.0, 40.0, 200.0));
        assert!(!translate_pool_event(&config, &event).is_resize());
    }

    #[test]
    fn zero_threshold_events_hold() {
        let config = PolicyConfig::default();
        let hold = Proposal::Hold {
            current: 4,
            unbounded: None,
        };
        let hot = PoolEvent::Hot(util(4, 10.0, 0.0, 0.0));
        assert_eq!(translate_pool_event(&config, &hot), hold);
        let cold = PoolEvent::Cold(util(4, 10.0, 0.0, 0.0));
        assert_eq!(translate_pool_event(&config, &cold), hold);
    }

    #[test]
    fn nan_threshold_events_hold() {
        let config = PolicyConfig::default();
        let hot = PoolEvent::Hot(util(4, 10.0, 1.0, f64::NAN));
        assert!(!translate_pool_event(&config, &hot).is_resize());
        let cold = PoolEvent::Cold(util(4, 10.0, f64::NAN, 200.0));
        assert_eq!(translate_pool_event(&config, &cold).unbounded(), None);
    }

    #[test]
    fn unusable_utilization_holds() {
        let config = PolicyConfig::default();
        let empty_pool = PoolEvent::Hot(util(0, 10.0, 40.0, 200.0));
        assert!(!translate_pool_event(&config, &empty_pool).is_resize());
        let infinite = PoolEvent::Hot(util(4, f64::INFINITY, 40.0, 200.0));
        assert!(!translate_pool_event(&config, &infinite).is_resize());
        let negative = PoolEvent::Cold(util(4, -5.0, 40.0, 200.0));
        assert!(!translate_pool_event(&config, &negative).is_resize());
    }

    #[test]
    fn ok_event_holds() {
        let config = PolicyConfig::default();
        let event = PoolEvent::Ok(util(7, 55.0, 40.0, 200.0));
        assert_eq!(
            translate_pool_event(&config, &event),
            Proposal::Hold {
                current: 7,
                unbounded: None
            }
        );
    }

    #[test]
    fn pool_event_deserializes_from_tagged_json() {
        let json = r#"{"kind":"hot","current_size":2,"current_workrate":10.0,"low_threshold":1.0,"high_threshold":4.0}"#;
        let event: PoolEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), "hot");
        assert_eq!(event.utilization().current_size, 2);
    }
}
