//! The resize collaborator.
//!
//! The autoscaler never owns the pool. It reads the current size and asks for
//! resizes through `ResizeTarget`, which the embedding system implements.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// Boxed future returned by collaborator callbacks.
pub type BoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// The pool being scaled.
pub trait ResizeTarget: Send + Sync + 'static {
    /// Current number of units in the pool.
    fn current_size(&self) -> u32;

    /// Resize the pool to `desired`, returning the size actually reached.
    ///
    /// The result may differ from `desired` under provider constraints; the
    /// autoscaler logs the difference but does not retry.
    fn resize(&self, desired: u32) -> BoxFuture<anyhow::Result<u32>>;

    /// Whether the pool is ready to be resized. Scheduling is suppressed
    /// while this returns `false`.
    fn is_up(&self) -> bool {
        true
    }
}

/// One completed resize on an `InMemoryPool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResizeRecord {
    #[serde(skip)]
    pub at: Instant,
    pub from: u32,
    pub requested: u32,
    pub achieved: u32,
}

struct PoolInner {
    size: AtomicU32,
    up: AtomicBool,
    /// Number of upcoming resize calls that fail.
    failures: AtomicU32,
    /// Provider-side cap on the achievable size.
    capacity: Option<u32>,
    latency: Duration,
    history: Mutex<Vec<ResizeRecord>>,
}

/// A `ResizeTarget` held entirely in memory.
///
/// Used by the simulator and by tests: records every resize, can be marked
/// down, can fail a number of upcoming calls, and can cap the achievable size.
#[derive(Clone)]
pub struct InMemoryPool {
    inner: Arc<PoolInner>,
}

impl InMemoryPool {
    pub fn new(initial_size: u32) -> Self {
        Self::build(initial_size, None, Duration::ZERO)
    }

    /// Cap the size a resize can actually reach.
    pub fn with_capacity(self, capacity: u32) -> Self {
        Self::build(self.size(), Some(capacity), self.inner.latency)
    }

    /// Make every resize take `latency` to complete.
    pub fn with_latency(self, latency: Duration) -> Self {
        Self::build(self.size(), self.inner.capacity, latency)
    }

    fn build(size: u32, capacity: Option<u32>, latency: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                size: AtomicU32::new(size),
                up: AtomicBool::new(true),
                failures: AtomicU32::new(0),
                capacity,
                latency,
                history: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn size(&self) -> u32 {
        self.inner.size.load(Ordering::SeqCst)
    }

    /// Change the size outside the autoscaler (e.g. a manual resize).
    pub fn set_size(&self, size: u32) {
        self.inner.size.store(size, Ordering::SeqCst);
    }

    pub fn set_up(&self, up: bool) {
        self.inner.up.store(up, Ordering::SeqCst);
    }

    /// Fail the next `n` resize calls.
    pub fn fail_next(&self, n: u32) {
        self.inner.failures.store(n, Ordering::SeqCst);
    }

    pub fn resizes(&self) -> Vec<ResizeRecord> {
        self.inner.history.lock().clone()
    }

    pub fn resize_count(&self) -> usize {
        self.inner.history.lock().len()
    }
}

impl ResizeTarget for InMemoryPool {
    fn current_size(&self) -> u32 {
        self.size()
    }

    fn resize(&self, desired: u32) -> BoxFuture<anyhow::Result<u32>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if !inner.latency.is_zero() {
                tokio::time::sleep(inner.latency).await;
            }

            let failing = inner
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                anyhow::bail!("injected resize failure (requested {desired})");
            }

            let achieved = inner.capacity.map_or(desired, |cap| desired.min(cap));
            let from = inner.size.swap(achieved, Ordering::SeqCst);
            inner.history.lock().push(ResizeRecord {
                at: Instant::now(),
                from,
                requested: desired,
                achieved,
            });
            debug!(from, requested = desired, achieved, "in-memory pool resized");
            Ok(achieved)
        })
    }

    fn is_up(&self) -> bool {
        self.inner.up.load(Ordering::SeqCst)
    }
}
