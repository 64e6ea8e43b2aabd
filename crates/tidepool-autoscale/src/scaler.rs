//! Autoscaler: the pool resize controller.
//!
//! Load signals are translated into proposed sizes and recorded in a
//! time-windowed history. Each scheduled cycle reads the current pool size,
//! evaluates the history with the grow/shrink stabilization delays, and
//! resizes through the `ResizeTarget` when the decision differs from the
//! current size. Unstable decisions queue another cycle so the windows are
//! re-read as old samples age out, even when no new samples arrive.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use tidepool_core::config::IterationStep;
use tidepool_core::translator::{translate_metric, translate_pool_event};
use tidepool_core::{
    evaluate, ConfigResult, PolicyConfig, PoolEvent, PoolLimits, Proposal, SizeHistory,
};

use crate::executor::ResizeTarget;
use crate::scheduler::{Job, ResizeScheduler, SchedulerState};

/// Emitted once when the unbounded desired size has stayed above
/// `max_pool_size` for the whole `max_reached_notification_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaxPoolSizeReached {
    pub current_pool_size: u32,
    pub max_allowed: u32,
    /// Latest unbounded desired size.
    pub current_unbounded: i64,
    /// Smallest unbounded desired size over the notification window.
    pub max_unbounded: i64,
    pub time_window: Duration,
}

/// Listener for `MaxPoolSizeReached`.
pub type MaxReachedCallback = Arc<dyn Fn(MaxPoolSizeReached) + Send + Sync>;

struct Shared {
    name: String,
    config: RwLock<PolicyConfig>,
    /// Sizes the translator asked for, clamped to the pool limits.
    desired: Mutex<SizeHistory>,
    /// Sizes the load asked for, ignoring the pool limits.
    unbounded: Mutex<SizeHistory>,
    target: Arc<dyn ResizeTarget>,
    scheduler: ResizeScheduler,
    on_max_reached: Mutex<Option<MaxReachedCallback>>,
    max_reached_notified: AtomicBool,
}

impl Shared {
    fn has_max_reached_listener(&self) -> bool {
        self.on_max_reached.lock().is_some()
    }

    fn schedule_resize(&self) {
        if self.scheduler.is_running() && self.target.is_up() {
            self.scheduler.request();
        }
    }
}

/// Resize controller for one pool.
pub struct Autoscaler {
    shared: Arc<Shared>,
}

impl Autoscaler {
    /// Create an autoscaler for `target`. Does not start scheduling; call
    /// [`Autoscaler::start`] from within a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        config: PolicyConfig,
        target: Arc<dyn ResizeTarget>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let shared = Shared {
            name: name.into(),
            desired: Mutex::new(SizeHistory::new(config.max_stabilization_delay())),
            unbounded: Mutex::new(SizeHistory::new(config.max_reached_notification_delay)),
            scheduler: ResizeScheduler::new(config.min_period_between_execs),
            config: RwLock::new(config),
            target,
            on_max_reached: Mutex::new(None),
            max_reached_notified: AtomicBool::new(false),
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Install a listener for max-pool-size-reached notifications.
    pub fn with_max_reached_callback(self, callback: MaxReachedCallback) -> Self {
        *self.shared.on_max_reached.lock() = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> PolicyConfig {
        self.shared.config.read().clone()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.shared.scheduler.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.scheduler.is_running()
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start the resize worker.
    pub fn start(&self) {
        let weak = Arc::downgrade(&self.shared);
        let job: Job = Arc::new(move || Box::pin(run_cycle(weak.clone())));
        self.shared.scheduler.start(job);
        info!(policy = %self.shared.name, "autoscaler started");
    }

    /// Cancel any outstanding resize and stop scheduling. Samples keep being
    /// recorded while suspended.
    pub fn suspend(&self) {
        self.shared.scheduler.stop();
        info!(policy = %self.shared.name, "autoscaler suspended");
    }

    /// Resume after [`Autoscaler::suspend`] with a fresh worker.
    pub fn resume(&self) {
        self.start();
    }

    // ── Ingestion ──────────────────────────────────────────────────

    /// Record a directly proposed pool size and schedule a resize check.
    pub fn on_candidate_size(&self, size: u32) {
        self.on_candidate_size_at(size, Instant::now());
    }

    pub fn on_candidate_size_at(&self, size: u32, at: Instant) {
        let clamped = self.shared.config.read().limits.clamp(size);
        trace!(policy = %self.shared.name, size, clamped, "recording candidate size");
        self.shared.desired.lock().record_at(i64::from(clamped), at);
        self.shared.schedule_resize();
    }

    /// Record a per-unit load metric reading. `None` means the metric source
    /// went away and is ignored.
    pub fn on_metric_sample(&self, value: Option<f64>) {
        self.on_metric_sample_at(value, Instant::now());
    }

    pub fn on_metric_sample_at(&self, value: Option<f64>, at: Instant) {
        let Some(value) = value else {
            trace!(policy = %self.shared.name, "not resizing pool, inbound metric is empty");
            return;
        };
        let current = self.shared.target.current_size();
        let proposal = translate_metric(&self.shared.config.read(), current, value);
        self.apply(proposal, "pool", at);
    }

    /// Record a pool-hot/cold/ok event.
    pub fn on_pool_event(&self, event: PoolEvent) {
        self.on_pool_event_at(event, Instant::now());
    }

    pub fn on_pool_event_at(&self, event: PoolEvent, at: Instant) {
        trace!(policy = %self.shared.name, kind = event.kind(), ?event, "recording pool event");
        let proposal = translate_pool_event(&self.shared.config.read(), &event);
        self.apply(proposal, event.kind(), at);
    }

    fn apply(&self, proposal: Proposal, description: &str, at: Instant) {
        let shared = &self.shared;
        match proposal {
            Proposal::Resize {
                current,
                desired,
                unbounded,
            } => {
                debug!(
                    policy = %shared.name,
                    description,
                    from = current,
                    to = desired,
                    unbounded,
                    "provisionally resizing"
                );
                shared.desired.lock().record_at(i64::from(desired), at);
                shared.schedule_resize();
            }
            Proposal::Hold { current, .. } => {
                trace!(policy = %shared.name, description, current, "not resizing");
                shared.desired.lock().record_at(i64::from(current), at);
            }
        }

        if !shared.has_max_reached_listener() {
            return;
        }
        match proposal.unbounded() {
            Some(unbounded) => {
                shared.unbounded.lock().record_at(unbounded, at);
                shared.schedule_resize();
            }
            // Load is satisfied by the current size.
            None => shared
                .unbounded
                .lock()
                .record_at(i64::from(proposal.recorded_size()), at),
        }
    }

    // ── Reconfiguration ────────────────────────────────────────────

    pub fn set_pool_limits(&self, min: u32, max: u32) -> ConfigResult<()> {
        self.reconfigure(|c| c.limits = PoolLimits::new(min, max))?;
        info!(policy = %self.shared.name, min, max, "pool size limits changed");
        self.on_pool_limits_changed(PoolLimits::new(min, max));
        Ok(())
    }

    pub fn set_min_pool_size(&self, min: u32) -> ConfigResult<()> {
        let max = self.shared.config.read().limits.max;
        self.set_pool_limits(min, max)
    }

    pub fn set_max_pool_size(&self, max: u32) -> ConfigResult<()> {
        let min = self.shared.config.read().limits.min;
        self.set_pool_limits(min, max)
    }

    /// Takes effect on the next metric sample.
    pub fn set_metric_bounds(&self, lower: Option<f64>, upper: Option<f64>) -> ConfigResult<()> {
        self.reconfigure(|c| {
            c.metric_lower_bound = lower;
            c.metric_upper_bound = upper;
        })?;
        info!(policy = %self.shared.name, ?lower, ?upper, "metric bounds changed");
        Ok(())
    }

    pub fn set_resize_up_stabilization_delay(&self, delay: Duration) -> ConfigResult<()> {
        self.reconfigure(|c| c.resize_up_stabilization_delay = delay)?;
        info!(
            policy = %self.shared.name,
            delay_ms = delay.as_millis() as u64,
            "resize-up stabilization delay changed"
        );
        Ok(())
    }

    pub fn set_resize_down_stabilization_delay(&self, delay: Duration) -> ConfigResult<()> {
        self.reconfigure(|c| c.resize_down_stabilization_delay = delay)?;
        info!(
            policy = %self.shared.name,
            delay_ms = delay.as_millis() as u64,
            "resize-down stabilization delay changed"
        );
        Ok(())
    }

    pub fn set_min_period_between_execs(&self, period: Duration) -> ConfigResult<()> {
        self.reconfigure(|c| c.min_period_between_execs = period)?;
        info!(
            policy = %self.shared.name,
            period_ms = period.as_millis() as u64,
            "min period between executions changed"
        );
        Ok(())
    }

    pub fn set_resize_up_step(&self, step: IterationStep) -> ConfigResult<()> {
        self.reconfigure(|c| c.resize_up_step = step)?;
        info!(
            policy = %self.shared.name,
            increment = step.increment,
            max = step.max,
            "resize-up iteration changed"
        );
        Ok(())
    }

    pub fn set_resize_down_step(&self, step: IterationStep) -> ConfigResult<()> {
        self.reconfigure(|c| c.resize_down_step = step)?;
        info!(
            policy = %self.shared.name,
            increment = step.increment,
            max = step.max,
            "resize-down iteration changed"
        );
        Ok(())
    }

    /// Apply `change` to a copy of the config, validate it, then swap it in
    /// and resize the dependent windows.
    fn reconfigure(&self, change: impl FnOnce(&mut PolicyConfig)) -> ConfigResult<()> {
        let shared = &self.shared;
        let mut next = shared.config.read().clone();
        change(&mut next);
        next.validate()?;

        shared.desired.lock().set_window(next.max_stabilization_delay());
        shared
            .unbounded
            .lock()
            .set_window(next.max_reached_notification_delay);
        shared.scheduler.set_min_period(next.min_period_between_execs);
        *shared.config.write() = next;
        Ok(())
    }

    /// Bring the current size into the new limits right away, without
    /// waiting for a load signal or the debounce period.
    fn on_pool_limits_changed(&self, limits: PoolLimits) {
        let shared = &self.shared;
        if !shared.scheduler.is_running() || !shared.target.is_up() {
            return;
        }

        let target = shared.target.clone();
        let name = shared.name.clone();
        shared.scheduler.submit(Box::pin(async move {
            let current = target.current_size();
            let desired = limits.clamp(current);
            if current == desired {
                return;
            }
            info!(
                policy = %name,
                from = current,
                to = desired,
                "resizing pool immediately due to new pool size limits"
            );
            if let Err(e) = target.resize(desired).await {
                error!(policy = %name, error = %e, "error resizing");
            }
        }));
    }
}

impl Drop for Autoscaler {
    fn drop(&mut self) {
        self.shared.scheduler.stop();
    }
}

/// One scheduled execution. Failures end this cycle only.
async fn run_cycle(shared: Weak<Shared>) {
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let result = async {
        resize_now(&shared).await?;
        notify_max_reached_if_required(&shared);
        anyhow::Ok(())
    }
    .await;

    if let Err(e) = result {
        if shared.scheduler.is_running() {
            error!(policy = %shared.name, error = %e, "error resizing");
        } else {
            debug!(policy = %shared.name, error = %e, "error resizing, but no longer running");
        }
    }
}

async fn resize_now(shared: &Shared) -> anyhow::Result<()> {
    let current = shared.target.current_size();
    let config = shared.config.read().clone();

    let decision = {
        let history = shared.desired.lock();
        evaluate(
            current,
            &history,
            config.resize_up_stabilization_delay,
            config.resize_down_stabilization_delay,
            config.limits,
            Instant::now(),
        )
    };

    if !decision.stable {
        // Re-check later even without new samples: the windows will shed old
        // data. Carry on with the best answer available now.
        trace!(
            policy = %shared.name,
            current,
            desired = decision.desired_size,
            "re-scheduling resize check, desired size not stable"
        );
        shared.schedule_resize();
    }

    if decision.desired_size == current {
        trace!(policy = %shared.name, current, "not resizing pool");
        return Ok(());
    }

    debug!(
        policy = %shared.name,
        current,
        desired = decision.desired_size,
        min = config.limits.min,
        max = config.limits.max,
        "requesting resize"
    );
    let achieved = shared
        .target
        .resize(decision.desired_size)
        .await
        .with_context(|| format!("resize from {current} to {}", decision.desired_size))?;

    if achieved != decision.desired_size {
        warn!(
            policy = %shared.name,
            requested = decision.desired_size,
            achieved,
            "pool resize reached a different size than requested"
        );
    }
    info!(policy = %shared.name, from = current, to = achieved, "pool resized");
    Ok(())
}

fn notify_max_reached_if_required(shared: &Shared) {
    let Some(callback) = shared.on_max_reached.lock().clone() else {
        return;
    };
    if shared.max_reached_notified.load(Ordering::SeqCst) {
        return;
    }

    let (window, max_allowed) = {
        let config = shared.config.read();
        (config.max_reached_notification_delay, config.limits.max)
    };
    let summary = shared
        .unbounded
        .lock()
        .summarize_window(Instant::now(), window);
    let Some(current_unbounded) = summary.latest else {
        return;
    };
    let max_allowed_i64 = i64::from(max_allowed);

    if summary.min > max_allowed_i64 {
        // Consistently wanted more than the max allowed for the whole window.
        let event = MaxPoolSizeReached {
            current_pool_size: shared.target.current_size(),
            max_allowed,
            current_unbounded,
            max_unbounded: summary.min,
            time_window: window,
        };
        debug!(policy = %shared.name, ?event, "notifying listener of max pool size reached");
        shared.max_reached_notified.store(true, Ordering::SeqCst);
        callback(event);
    } else if summary.max > max_allowed_i64 {
        // Temporarily above the max; check back once the window settles.
        trace!(
            policy = %shared.name,
            min = summary.min,
            max = summary.max,
            latest = current_unbounded,
            "re-scheduling max-reached check, unbounded size not stable"
        );
        shared.schedule_resize();
    }
}
