//! Error types for policy configuration.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while building or reconfiguring a policy.
///
/// All of these are fatal to the operation that produced them; a controller
/// is never created (or reconfigured) from an invalid config.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("min pool size {min} must not be greater than max pool size {max}")]
    PoolBounds { min: u32, max: u32 },

    #[error("metric lower bound {lower} must not be greater than upper bound {upper}")]
    MetricBounds { lower: f64, upper: f64 },

    #[error("{name} must be a finite, non-negative number (got {value})")]
    InvalidBound { name: &'static str, value: f64 },

    #[error("{0} must be at least 1")]
    ZeroStep(&'static str),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("failed to parse policy file: {0}")]
    Parse(String),
}
