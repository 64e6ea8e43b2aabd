//! tidepool-autoscale: the resize control loop.
//!
//! Wires the pure decision logic from `tidepool-core` to a live pool:
//! ingestion entry points record proposed sizes, a debounced single-worker
//! scheduler re-evaluates the size history, and the externally supplied
//! `ResizeTarget` performs the resize.
//!
//! # Architecture
//!
//! ```text
//! Autoscaler
//!   ├── on_metric_sample() / on_pool_event() / on_candidate_size()
//!   │     └── record into SizeHistory, then ResizeScheduler::request()
//!   └── ResizeScheduler (one worker task per autoscaler)
//!         └── cycle: evaluate() → ResizeTarget::resize() → max-size check
//! ```
//!
//! At most one resize is in flight per autoscaler. Requests arriving while a
//! cycle is queued are coalesced into it; requests arriving while a cycle is
//! executing queue a fresh one.

pub mod executor;
pub mod scaler;
pub mod scheduler;

pub use executor::{BoxFuture, InMemoryPool, ResizeRecord, ResizeTarget};
pub use scaler::{Autoscaler, MaxPoolSizeReached, MaxReachedCallback};
pub use scheduler::{ResizeScheduler, SchedulerState};
