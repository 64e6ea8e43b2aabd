use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tidepool_autoscale::{Autoscaler, InMemoryPool, MaxPoolSizeReached};
use tokio::time::Instant;
use tracing::info;

use crate::scenario::{Scenario, Signal};

/// Outcome of replaying a scenario.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub initial_size: u32,
    pub final_size: u32,
    pub resizes: Vec<ResizeLine>,
    pub notifications: Vec<NotificationLine>,
}

#[derive(Debug, Serialize)]
pub struct ResizeLine {
    pub at_ms: u64,
    pub from: u32,
    pub requested: u32,
    pub achieved: u32,
}

#[derive(Debug, Serialize)]
pub struct NotificationLine {
    pub at_ms: u64,
    pub current_pool_size: u32,
    pub max_allowed: u32,
    pub current_unbounded: i64,
    pub max_unbounded: i64,
    pub time_window_ms: u64,
}

pub async fn simulate(path: &Path, format: &str) -> anyhow::Result<()> {
    let scenario = Scenario::from_file(path)?;
    info!(
        steps = scenario.steps.len(),
        initial_size = scenario.initial_size,
        duration_ms = (scenario.duration() + scenario.settle).as_millis() as u64,
        "replaying scenario"
    );

    let report = run(&scenario).await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => println!("{}", format_report(&report)),
    }
    Ok(())
}

/// Replay `scenario` in real time against an in-memory pool.
pub async fn run(scenario: &Scenario) -> anyhow::Result<SimulationReport> {
    let pool = InMemoryPool::new(scenario.initial_size);
    let start = Instant::now();

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    let scaler = Autoscaler::new("simulation", scenario.policy.clone(), Arc::new(pool.clone()))?
        .with_max_reached_callback(Arc::new(move |event: MaxPoolSizeReached| {
            sink.lock().push(NotificationLine {
                at_ms: millis_since(start, Instant::now()),
                current_pool_size: event.current_pool_size,
                max_allowed: event.max_allowed,
                current_unbounded: event.current_unbounded,
                max_unbounded: event.max_unbounded,
                time_window_ms: event.time_window.as_millis() as u64,
            });
        }));
    scaler.start();

    for step in &scenario.steps {
        tokio::time::sleep_until(start + step.at).await;
        match &step.signal {
            Signal::Metric(value) => scaler.on_metric_sample(Some(*value)),
            Signal::Candidate(size) => scaler.on_candidate_size(*size),
            Signal::Pool(event) => scaler.on_pool_event(*event),
        }
    }
    tokio::time::sleep(scenario.settle).await;
    scaler.suspend();

    let resizes = pool
        .resizes()
        .into_iter()
        .map(|r| ResizeLine {
            at_ms: millis_since(start, r.at),
            from: r.from,
            requested: r.requested,
            achieved: r.achieved,
        })
        .collect();

    let notifications = std::mem::take(&mut *notifications.lock());
    Ok(SimulationReport {
        initial_size: scenario.initial_size,
        final_size: pool.size(),
        resizes,
        notifications,
    })
}

fn millis_since(start: Instant, at: Instant) -> u64 {
    at.saturating_duration_since(start).as_millis() as u64
}

pub fn format_report(report: &SimulationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("initial size: {}\n", report.initial_size));

    if report.resizes.is_empty() {
        out.push_str("no resizes\n");
    }
    for r in &report.resizes {
        out.push_str(&format!("{:>7}ms  resize {} → {}", r.at_ms, r.from, r.achieved));
        if r.achieved != r.requested {
            out.push_str(&format!(" (requested {})", r.requested));
        }
        out.push('\n');
    }
    for n in &report.notifications {
        out.push_str(&format!(
            "{:>7}ms  max pool size {} reached: wanted {} (at least {} for {}ms)\n",
            n.at_ms, n.max_allowed, n.current_unbounded, n.max_unbounded, n.time_window_ms
        ));
    }

    out.push_str(&format!("final size: {}", report.final_size));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn replays_metric_scenario() {
        let scenario = Scenario::from_toml(
            r#"
initial_size = 2

[policy]
metric_lower_bound = 50.0
metric_upper_bound = 100.0

[[step]]
at = "0ms"
metric = 250.0

[[step]]
at = "1s"
metric = 10.0
"#,
        )
        .unwrap();

        let report = run(&scenario).await.unwrap();
        let sizes: Vec<_> = report.resizes.iter().map(|r| r.achieved).collect();
        // 2 × 250 / 100 → 5; then 5 × 10 = 50 total → ceil(50 / 100) = 1.
        assert_eq!(sizes, vec![5, 1]);
        assert_eq!(report.final_size, 1);
        assert!(report.notifications.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reports_max_size_reached() {
        let scenario = Scenario::from_toml(
            r#"
initial_size = 1

[policy]
max_pool_size = 3
metric_lower_bound = 10.0
metric_upper_bound = 20.0

[[step]]
at = "0ms"
metric = 200.0
"#,
        )
        .unwrap();

        let report = run(&scenario).await.unwrap();
        assert_eq!(report.final_size, 3);
        assert_eq!(report.notifications.len(), 1);
        assert_eq!(report.notifications[0].current_unbounded, 10);
    }

    #[test]
    fn text_report_lists_resizes() {
        let report = SimulationReport {
            initial_size: 2,
            final_size: 3,
            resizes: vec![ResizeLine {
                at_ms: 100,
                from: 2,
                requested: 5,
                achieved: 3,
            }],
            notifications: vec![],
        };
        let text = format_report(&report);
        assert!(text.contains("resize 2 → 3 (requested 5)"));
        assert!(text.ends_with("final size: 3"));
    }
}
