//! Signal conditioning, calibration and sensor abstractions for HiveWatch.
//!
//! This crate contains the hardware-independent core of the collector:
//!
//! - [`conditioning`]: robust averaging of noisy samples with outlier rejection
//! - [`calibration`]: guided two- and three-point load-cell calibration
//! - [`traits`]: the [`Sensor`], [`WeightSensor`] and [`ErrorSink`] seams
//! - [`bounded`]: deadline-bounded sensor reads
//! - [`error_log`]: persistent JSON error log
//! - [`mock`]: mock sensors for testing without hardware
//!
//! # Example
//!
//! ```
//! use hivewatch_core::{MockWeightSensor, weigh};
//! use hivewatch_types::CalibrationProfile;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> hivewatch_core::Result<()> {
//!     let scale = MockWeightSensor::new(3000.0);
//!     let profile = CalibrationProfile::new(2.0, 1000.0, 500.0);
//!
//!     let reading = weigh(&scale, Some(&profile), 5, Duration::from_secs(3)).await?;
//!     assert_eq!(reading.value, 1000.0);
//!     Ok(())
//! }
//! ```

pub mod bounded;
pub mod calibration;
pub mod conditioning;
pub mod error;
pub mod error_log;
pub mod mock;
pub mod profile;
pub mod traits;
pub mod util;

pub use bounded::{DEFAULT_SENSOR_TIMEOUT, read_samples_with_timeout, read_with_timeout};
pub use calibration::{
    CalibrationGrade, CalibrationOperator, CalibrationOptions, CalibrationStep, Calibrator,
    SelfTestReport, WeightReading, derive_profile, weigh,
};
pub use conditioning::{ConditionedValue, MeasurementStatistics, Rejection, Stability, condition};
pub use error::{Error, Result};
pub use error_log::{ErrorEntry, JsonErrorLog, TracingSink, codes};
pub use mock::{MemorySink, MockSensor, MockWeightSensor};
pub use profile::ProfileFile;
pub use traits::{ErrorSink, Sensor, WeightSensor};

// Re-export the shared types for convenience
pub use hivewatch_types;
