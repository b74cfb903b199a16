//! Shared types for the HiveWatch edge telemetry collector.
//!
//! This crate holds the plain data types used by every other crate in the
//! workspace: sensor channels, the per-cycle [`Readings`] set, and the
//! load-cell [`CalibrationProfile`].
//!
//! # Example
//!
//! ```
//! use hivewatch_types::{CalibrationProfile, Channel, Readings};
//!
//! let profile = CalibrationProfile::new(2.0, 1000.0, 500.0);
//! let weight = profile.to_units(3000.0).unwrap();
//!
//! let readings = Readings::new().with(Channel::Weight, weight);
//! assert_eq!(readings.get(Channel::Weight), Some(1000.0));
//! ```

pub mod calibration;
pub mod channel;
pub mod error;

pub use calibration::{
    CalibrationDiagnostics, CalibrationMode, CalibrationProfile, StepSummary, convert,
};
pub use channel::{Channel, Readings};
pub use error::{ConversionError, ParseError};
