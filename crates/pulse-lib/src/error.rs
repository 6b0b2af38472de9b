use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Data-quality problems found while deriving an RR interval. These are
/// counted and logged, never returned to the caller of `ingest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("heart rate must be a positive, finite number")]
    NonPositiveBpm,
    #[error("timestamp must be a finite number")]
    InvalidTimestamp,
    #[error("timestamp moved backwards")]
    NonMonotonic,
    #[error("RR interval outside the physiological range")]
    OutOfRange,
    #[error("sample already delivered")]
    Duplicate,
    #[error("sample older than the newest delivered sample")]
    OutOfOrder,
}

/// Invalid engine, simulator or schedule configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window capacity must be at least 1")]
    ZeroCapacity,
    #[error("invalid RR range [{min}, {max}] seconds")]
    InvalidRange { min: f64, max: f64 },
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },
}
