//! Load scenario files for `tidepool simulate`.
//!
//! ```toml
//! initial_size = 2
//! settle = "1s"
//!
//! [policy]
//! metric_lower_bound = 50.0
//! metric_upper_bound = 100.0
//!
//! [[step]]
//! at = "0ms"
//! metric = 250.0
//!
//! [[step]]
//! at = "400ms"
//! pool = "cold"
//! size = 5
//! workrate = 40.0
//! low_threshold = 100.0
//! high_threshold = 400.0
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use tidepool_core::config::parse_duration;
use tidepool_core::{PolicyConfig, PolicyFile, PoolEvent, PoolUtilization};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioFile {
    #[serde(default)]
    policy: PolicyFile,
    initial_size: u32,
    settle: Option<String>,
    #[serde(default, rename = "step")]
    steps: Vec<StepFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PoolKind {
    Hot,
    Cold,
    Ok,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepFile {
    at: String,
    metric: Option<f64>,
    candidate: Option<u32>,
    pool: Option<PoolKind>,
    size: Option<u32>,
    workrate: Option<f64>,
    low_threshold: Option<f64>,
    high_threshold: Option<f64>,
}

/// One load signal delivered to the autoscaler.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Metric(f64),
    Candidate(u32),
    Pool(PoolEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Offset from the start of the run.
    pub at: Duration,
    pub signal: Signal,
}

/// A validated scenario, steps ordered by offset.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub policy: PolicyConfig,
    pub initial_size: u32,
    /// How long to keep running after the last step.
    pub settle: Duration,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let file: ScenarioFile = toml::from_str(content)?;
        let policy = file.policy.resolve()?;

        let mut steps = file
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| step.resolve().with_context(|| format!("step {}", i + 1)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        steps.sort_by_key(|s| s.at);

        let settle = match file.settle.as_deref() {
            Some(s) => parse_duration("settle", s)?,
            None => default_settle(&policy),
        };

        Ok(Self {
            policy,
            initial_size: file.initial_size,
            settle,
            steps,
        })
    }

    /// Offset of the last step.
    pub fn duration(&self) -> Duration {
        self.steps.last().map_or(Duration::ZERO, |s| s.at)
    }
}

/// Long enough for every window to fill and a couple of cycles to run.
fn default_settle(policy: &PolicyConfig) -> Duration {
    policy
        .max_stabilization_delay()
        .max(policy.max_reached_notification_delay)
        + policy.min_period_between_execs * 2
}

impl StepFile {
    fn resolve(self) -> anyhow::Result<Step> {
        let at = parse_duration("at", &self.at)?;

        let signal = match (self.metric, self.candidate, self.pool) {
            (Some(metric), None, None) => Signal::Metric(metric),
            (None, Some(candidate), None) => Signal::Candidate(candidate),
            (None, None, Some(kind)) => {
                let (Some(size), Some(workrate), Some(low), Some(high)) =
                    (self.size, self.workrate, self.low_threshold, self.high_threshold)
                else {
                    bail!("pool steps need size, workrate, low_threshold and high_threshold");
                };
                let utilization = PoolUtilization {
                    current_size: size,
                    current_workrate: workrate,
                    low_threshold: low,
                    high_threshold: high,
                };
                Signal::Pool(match kind {
                    PoolKind::Hot => PoolEvent::Hot(utilization),
                    PoolKind::Cold => PoolEvent::Cold(utilization),
                    PoolKind::Ok => PoolEvent::Ok(utilization),
                })
            }
            _ => bail!("a step needs exactly one of metric, candidate or pool"),
        };

        Ok(Step { at, signal })
    }
}
