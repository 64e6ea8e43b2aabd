//! tidepool-core: the decision half of the Tidepool pool autoscaler.
//!
//! Everything in this crate is synchronous and clock-injected: callers pass
//! the `now` instant explicitly, which keeps the arithmetic testable without
//! a running executor.
//!
//! # Pipeline
//!
//! ```text
//! metric sample / pool event
//!   └── translator::translate_metric / translate_pool_event → Proposal
//!         └── SizeHistory::record (TimeWindowedSeries underneath)
//!               └── stability::evaluate → PoolSizeDecision
//! ```
//!
//! Scheduling and the resize operator live in `tidepool-autoscale`.

pub mod config;
pub mod error;
pub mod series;
pub mod stability;
pub mod translator;

pub use config::{IterationStep, PolicyConfig, PolicyFile, PoolLimits};
pub use error::{ConfigError, ConfigResult};
pub use series::{Sample, TimeWindowedSeries};
pub use stability::{evaluate, PoolSizeDecision, SizeHistory, WindowSummary};
pub use translator::{translate_metric, translate_pool_event, PoolEvent, PoolUtilization, Proposal};
