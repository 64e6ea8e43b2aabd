//! Policy configuration.
//!
//! `PolicyConfig` is the validated runtime form used by the controller.
//! `PolicyFile` is what lives on disk (TOML, human-readable durations) and
//! resolves into a `PolicyConfig`.
//!
//! ```toml
//! min_pool_size = 1
//! max_pool_size = 20
//! metric_lower_bound = 50.0
//! metric_upper_bound = 100.0
//! resize_up_stabilization_delay = "30s"
//! resize_down_stabilization_delay = "5m"
//! min_period_between_execs = "100ms"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Inclusive `[min, max]` pool size range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLimits {
    pub min: u32,
    pub max: u32,
}

impl PoolLimits {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.min > self.max {
            return Err(ConfigError::PoolBounds {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn clamp(&self, size: u32) -> u32 {
        size.max(self.min).min(self.max)
    }

    /// Clamp a possibly negative or oversized value into the range.
    pub fn clamp_i64(&self, size: i64) -> u32 {
        size.clamp(i64::from(self.min), i64::from(self.max)) as u32
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            min: 0,
            max: u32::MAX,
        }
    }
}

/// Batch size and per-decision cap for one resize direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationStep {
    /// The size changes by a multiple of this value.
    pub increment: u32,
    /// Largest change applied by a single decision.
    pub max: u32,
}

impl Default for IterationStep {
    fn default() -> Self {
        Self {
            increment: 1,
            max: u32::MAX,
        }
    }
}

/// Validated autoscaler policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyConfig {
    pub limits: PoolLimits,
    pub metric_lower_bound: Option<f64>,
    pub metric_upper_bound: Option<f64>,
    pub resize_up_stabilization_delay: Duration,
    pub resize_down_stabilization_delay: Duration,
    pub min_period_between_execs: Duration,
    pub resize_up_step: IterationStep,
    pub resize_down_step: IterationStep,
    pub max_reached_notification_delay: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            limits: PoolLimits::default(),
            metric_lower_bound: None,
            metric_upper_bound: None,
            resize_up_stabilization_delay: Duration::ZERO,
            resize_down_stabilization_delay: Duration::ZERO,
            min_period_between_execs: Duration::from_millis(100),
            resize_up_step: IterationStep::default(),
            resize_down_step: IterationStep::default(),
            max_reached_notification_delay: Duration::ZERO,
        }
    }
}

impl PolicyConfig {
    pub fn with_pool_limits(mut self, min: u32, max: u32) -> Self {
        self.limits = PoolLimits::new(min, max);
        self
    }

    pub fn with_metric_range(mut self, lower: f64, upper: f64) -> Self {
        self.metric_lower_bound = Some(lower);
        self.metric_upper_bound = Some(upper);
        self
    }

    pub fn with_stabilization_delays(mut self, up: Duration, down: Duration) -> Self {
        self.resize_up_stabilization_delay = up;
        self.resize_down_stabilization_delay = down;
        self
    }

    pub fn with_min_period_between_execs(mut self, period: Duration) -> Self {
        self.min_period_between_execs = period;
        self
    }

    pub fn with_max_reached_notification_delay(mut self, delay: Duration) -> Self {
        self.max_reached_notification_delay = delay;
        self
    }

    /// Longest of the two stabilization delays; the desired-size history
    /// must retain at least this much.
    pub fn max_stabilization_delay(&self) -> Duration {
        self.resize_up_stabilization_delay
            .max(self.resize_down_stabilization_delay)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.limits.validate()?;
        validate_metric_bounds(self.metric_lower_bound, self.metric_upper_bound)?;
        validate_step(
            "resize_up_iteration_increment",
            "resize_up_iteration_max",
            self.resize_up_step,
        )?;
        validate_step(
            "resize_down_iteration_increment",
            "resize_down_iteration_max",
            self.resize_down_step,
        )?;
        Ok(())
    }
}

fn validate_metric_bounds(lower: Option<f64>, upper: Option<f64>) -> ConfigResult<()> {
    for (name, bound) in [("metric_lower_bound", lower), ("metric_upper_bound", upper)] {
        if let Some(value) = bound
            && (!value.is_finite() || value < 0.0)
        {
            return Err(ConfigError::InvalidBound { name, value });
        }
    }
    if let (Some(lower), Some(upper)) = (lower, upper)
        && lower > upper
    {
        return Err(ConfigError::MetricBounds { lower, upper });
    }
    Ok(())
}

fn validate_step(
    increment_name: &'static str,
    max_name: &'static str,
    step: IterationStep,
) -> ConfigResult<()> {
    if step.increment == 0 {
        return Err(ConfigError::ZeroStep(increment_name));
    }
    if step.max == 0 {
        return Err(ConfigError::ZeroStep(max_name));
    }
    Ok(())
}

/// On-disk policy representation. Every field is optional and falls back to
/// the `PolicyConfig` default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    pub min_pool_size: Option<u32>,
    pub max_pool_size: Option<u32>,
    pub metric_lower_bound: Option<f64>,
    pub metric_upper_bound: Option<f64>,
    pub resize_up_stabilization_delay: Option<String>,
    pub resize_down_stabilization_delay: Option<String>,
    pub min_period_between_execs: Option<String>,
    pub resize_up_iteration_increment: Option<u32>,
    pub resize_up_iteration_max: Option<u32>,
    pub resize_down_iteration_increment: Option<u32>,
    pub resize_down_iteration_max: Option<u32>,
    pub max_reached_notification_delay: Option<String>,
}

impl PolicyFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse durations, apply defaults, and validate.
    pub fn resolve(&self) -> ConfigResult<PolicyConfig> {
        let defaults = PolicyConfig::default();
        let duration = |field: &'static str, value: &Option<String>, default: Duration| {
            value
                .as_deref()
                .map(|v| parse_duration(field, v))
                .unwrap_or(Ok(default))
        };

        let config = PolicyConfig {
            limits: PoolLimits::new(
                self.min_pool_size.unwrap_or(defaults.limits.min),
                self.max_pool_size.unwrap_or(defaults.limits.max),
            ),
            metric_lower_bound: self.metric_lower_bound,
            metric_upper_bound: self.metric_upper_bound,
            resize_up_stabilization_delay: duration(
                "resize_up_stabilization_delay",
                &self.resize_up_stabilization_delay,
                defaults.resize_up_stabilization_delay,
            )?,
            resize_down_stabilization_delay: duration(
                "resize_down_stabilization_delay",
                &self.resize_down_stabilization_delay,
                defaults.resize_down_stabilization_delay,
            )?,
            min_period_between_execs: duration(
                "min_period_between_execs",
                &self.min_period_between_execs,
                defaults.min_period_between_execs,
            )?,
            resize_up_step: IterationStep {
                increment: self
                    .resize_up_iteration_increment
                    .unwrap_or(defaults.resize_up_step.increment),
                max: self.resize_up_iteration_max.unwrap_or(defaults.resize_up_step.max),
            },
            resize_down_step: IterationStep {
                increment: self
                    .resize_down_iteration_increment
                    .unwrap_or(defaults.resize_down_step.increment),
                max: self
                    .resize_down_iteration_max
                    .unwrap_or(defaults.resize_down_step.max),
            },
            max_reached_notification_delay: duration(
                "max_reached_notification_delay",
                &self.max_reached_notification_delay,
                defaults.max_reached_notification_delay,
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<&PolicyConfig> for PolicyFile {
    /// Fully populated file form of a resolved config.
    fn from(config: &PolicyConfig) -> Self {
        Self {
            min_pool_size: Some(config.limits.min),
            max_pool_size: Some(config.limits.max),
            metric_lower_bound: config.metric_lower_bound,
            metric_upper_bound: config.metric_upper_bound,
            resize_up_stabilization_delay: Some(format_duration(
                config.resize_up_stabilization_delay,
            )),
            resize_down_stabilization_delay: Some(format_duration(
                config.resize_down_stabilization_delay,
            )),
            min_period_between_execs: Some(format_duration(config.min_period_between_execs)),
            resize_up_iteration_increment: Some(config.resize_up_step.increment),
            resize_up_iteration_max: Some(config.resize_up_step.max),
            resize_down_iteration_increment: Some(config.resize_down_step.increment),
            resize_down_iteration_max: Some(config.resize_down_step.max),
            max_reached_notification_delay: Some(format_duration(
                config.max_reached_notification_delay,
            )),
        }
    }
}

/// Render a duration in the largest unit that divides it exactly.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    match ms {
        0 => "0ms".to_string(),
        ms if ms % 3_600_000 == 0 => format!("{}h", ms / 3_600_000),
        ms if ms % 60_000 == 0 => format!("{}m", ms / 60_000),
        ms if ms % 1_000 == 0 => format!("{}s", ms / 1_000),
        ms => format!("{ms}ms"),
    }
}

/// Parse a duration string like "250ms", "30s", "5m", "1h". A bare number is
/// taken as milliseconds.
pub fn parse_duration(field: &'static str, s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::Duration {
        field,
        value: s.to_string(),
    };

    let (digits, unit_ms) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000)
    } else {
        (s, 1)
    };

    let n = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    n.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}
