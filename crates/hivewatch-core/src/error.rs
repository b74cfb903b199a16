//! Error types for hivewatch-core.
//!
//! # Failure isolation
//!
//! Every variant maps to a recovery rule applied by the collector:
//!
//! | Error | Handling |
//! |-------|----------|
//! | [`Error::SensorUnavailable`] | Channel recorded as missing for this cycle |
//! | [`Error::Timeout`] | Same as an unavailable sensor; the read is abandoned |
//! | [`Error::InsufficientData`] | Treated as "no reading" |
//! | [`Error::Conversion`] | Weight recorded as missing (uncalibrated) |
//! | [`Error::CalibrationFailed`] | Calibration aborted, last good profile kept |
//! | [`Error::Cancelled`] | Operator aborted a calibration step |
//! | [`Error::Io`] / [`Error::Json`] | Profile or error log file problem, logged |
//!
//! None of these are fatal to the collection loop.

use std::time::Duration;

use thiserror::Error;

use hivewatch_types::{Channel, ConversionError};

/// Errors produced by sensors, conditioning and calibration.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A sensor could not produce a value.
    #[error("Sensor {channel} unavailable: {reason}")]
    SensorUnavailable { channel: Channel, reason: String },

    /// An operation exceeded its deadline and was abandoned.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Too few valid samples to compute a value.
    #[error("Insufficient data: need at least {required} valid samples, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Raw-to-unit conversion failed.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// A calibration run could not produce a valid profile.
    #[error("Calibration failed: {0}")]
    CalibrationFailed(String),

    /// Operation cancelled by the operator.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a sensor-unavailable error.
    pub fn sensor_unavailable(channel: Channel, reason: impl Into<String>) -> Self {
        Self::SensorUnavailable {
            channel,
            reason: reason.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a calibration failure.
    pub fn calibration_failed(reason: impl Into<String>) -> Self {
        Self::CalibrationFailed(reason.into())
    }
}

/// Result type alias using hivewatch-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
