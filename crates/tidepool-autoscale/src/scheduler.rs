//! Resize scheduler: debounced, single-worker execution of resize cycles.
//!
//! ```text
//! IDLE ──request()──▶ QUEUED ──delay elapses──▶ EXECUTING ──cycle ends──▶ IDLE
//!                       ▲                            │
//!                       └──── request() during ──────┘
//! ```
//!
//! `request()` is a compare-and-set on the queued flag, so any number of
//! concurrent callers produce a single pending cycle. The flag is cleared
//! when the cycle starts, before it reads any state, so a request arriving
//! mid-cycle queues another one rather than being lost. Cycles are spaced at
//! least `min_period` apart, measured from the start of the previous cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::sync::Mutex as CycleLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::executor::BoxFuture;

/// The cycle body run by the worker.
pub type Job = Arc<dyn Fn() -> BoxFuture<()> + Send + Sync>;

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No worker (never started, or suspended).
    Stopped,
    Idle,
    Queued,
    Executing,
}

enum WorkItem {
    /// Run the standing job after the given delay.
    Scheduled(Duration),
    /// Run a one-off task now, still serialized with cycles.
    Immediate(BoxFuture<()>),
}

/// Shared between request callers and the worker.
#[derive(Default)]
struct PendingResize {
    queued: AtomicBool,
    executing: AtomicBool,
    last_execution: Mutex<Option<Instant>>,
}

impl PendingResize {
    fn begin_execution(&self) {
        *self.last_execution.lock() = Some(Instant::now());
        self.queued.store(false, Ordering::SeqCst);
        self.executing.store(true, Ordering::SeqCst);
    }
}

struct WorkerSlot {
    tx: mpsc::UnboundedSender<WorkItem>,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Serializes resize cycles on a private worker task.
pub struct ResizeScheduler {
    pending: Arc<PendingResize>,
    /// Held by every running cycle. Outlives worker restarts, so a cycle left
    /// running by `stop()` still excludes the next worker's cycles.
    cycle_lock: Arc<CycleLock<()>>,
    min_period: Mutex<Duration>,
    worker: Mutex<Option<WorkerSlot>>,
}

impl ResizeScheduler {
    pub fn new(min_period: Duration) -> Self {
        Self {
            pending: Arc::new(PendingResize::default()),
            cycle_lock: Arc::new(CycleLock::new(())),
            min_period: Mutex::new(min_period),
            worker: Mutex::new(None),
        }
    }

    /// Spawn a fresh worker running `job` for each scheduled cycle.
    ///
    /// Replaces any existing worker. Must be called within a tokio runtime.
    pub fn start(&self, job: Job) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pending = self.pending.clone();
        let cycle_lock = self.cycle_lock.clone();

        let handle = tokio::spawn(run_worker(job, pending, cycle_lock, rx, shutdown_rx));

        let old = self.worker.lock().replace(WorkerSlot {
            tx,
            handle,
            shutdown_tx,
        });
        if let Some(old) = old {
            shutdown_slot(old);
        }
        self.pending.queued.store(false, Ordering::SeqCst);
        debug!("resize worker started");
    }

    /// Cancel any outstanding cycle and stop the worker.
    ///
    /// A cycle that is already executing is allowed to finish; cycles of a
    /// restarted worker wait for it.
    pub fn stop(&self) {
        if let Some(slot) = self.worker.lock().take() {
            shutdown_slot(slot);
            debug!("resize worker stopped");
        }
        self.pending.queued.store(false, Ordering::SeqCst);
        self.pending.executing.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Queue a cycle unless one is already queued. Never blocks.
    ///
    /// Returns `true` if this call queued the cycle.
    pub fn request(&self) -> bool {
        let worker = self.worker.lock();
        let Some(slot) = worker.as_ref() else {
            return false;
        };

        if self
            .pending
            .queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let delay = self.delay_until_next();
        trace!(delay_ms = delay.as_millis() as u64, "scheduling resize");
        if slot.tx.send(WorkItem::Scheduled(delay)).is_err() {
            self.pending.queued.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Run `task` on the worker as soon as it is free, bypassing the debounce.
    pub fn submit(&self, task: BoxFuture<()>) -> bool {
        match self.worker.lock().as_ref() {
            Some(slot) => slot.tx.send(WorkItem::Immediate(task)).is_ok(),
            None => false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if !self.is_running() {
            SchedulerState::Stopped
        } else if self.pending.executing.load(Ordering::SeqCst) {
            SchedulerState::Executing
        } else if self.pending.queued.load(Ordering::SeqCst) {
            SchedulerState::Queued
        } else {
            SchedulerState::Idle
        }
    }

    pub fn min_period(&self) -> Duration {
        *self.min_period.lock()
    }

    pub fn set_min_period(&self, period: Duration) {
        *self.min_period.lock() = period;
    }

    fn delay_until_next(&self) -> Duration {
        match *self.pending.last_execution.lock() {
            Some(last) => (last + self.min_period()).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }
}

impl Drop for ResizeScheduler {
    fn drop(&mut self) {
        if let Some(slot) = self.worker.get_mut().take() {
            shutdown_slot(slot);
        }
    }
}

fn shutdown_slot(slot: WorkerSlot) {
    let _ = slot.shutdown_tx.send(true);
    slot.handle.abort();
}

async fn run_worker(
    job: Job,
    pending: Arc<PendingResize>,
    cycle_lock: Arc<CycleLock<()>>,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let item = tokio::select! {
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        match item {
            WorkItem::Scheduled(delay) => {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                pending.begin_execution();
                run_isolated(cycle_lock.clone(), job()).await;
            }
            WorkItem::Immediate(task) => {
                pending.executing.store(true, Ordering::SeqCst);
                run_isolated(cycle_lock.clone(), task).await;
            }
        }
        pending.executing.store(false, Ordering::SeqCst);
    }
    trace!("resize worker exiting");
}

/// Run one cycle on its own task so a panic ends only that cycle.
///
/// The cycle lock is taken inside the spawned task, so it stays held until
/// the cycle ends even if the worker awaiting it is aborted.
async fn run_isolated(cycle_lock: Arc<CycleLock<()>>, task: BoxFuture<()>) {
    let guarded = async move {
        let _cycle = cycle_lock.lock_owned().await;
        task.await;
    };
    if let Err(e) = tokio::spawn(guarded).await
        && e.is_panic()
    {
        error!(error = %e, "resize cycle panicked");
    }
}
