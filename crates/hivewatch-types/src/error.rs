//! Error types shared across the HiveWatch crates.

use thiserror::Error;

/// Errors raised while parsing textual identifiers such as channel names.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The name does not match any known sensor channel.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// The name does not match any calibration mode.
    #[error("Unknown calibration mode: {0}")]
    UnknownCalibrationMode(String),
}

/// Errors raised when converting raw load-cell counts to engineering units.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum ConversionError {
    /// No calibration profile is loaded, or the loaded one has a zero
    /// reference unit. Never reported as a zero weight.
    #[error("Weight sensor is not calibrated")]
    Uncalibrated,

    /// The raw value was NaN or infinite.
    #[error("Raw value is not a finite number: {0}")]
    NonFinite(f64),
}
