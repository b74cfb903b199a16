//! Trait abstractions for sensors and error reporting.
//!
//! Hardware adapters and mocks both implement these traits so the collector
//! and the calibrator can be driven without real hardware.

use std::sync::Arc;

use async_trait::async_trait;

use hivewatch_types::Channel;

use crate::error::Result;

/// A single-value sensor channel.
///
/// `Ok(None)` means the hardware answered but had no value to give (for
/// example a sensor that is not fitted). Both `Ok(None)` and `Err(_)` end up
/// as a missing channel in the stored record; the distinction only matters
/// for logging.
///
/// # Example
///
/// ```ignore
/// use hivewatch_core::Sensor;
///
/// async fn print_value<S: Sensor + ?Sized>(sensor: &S) {
///     match sensor.read().await {
///         Ok(Some(v)) => println!("{} = {v}", sensor.channel()),
///         Ok(None) => println!("{} has no value", sensor.channel()),
///         Err(e) => eprintln!("{e}"),
///     }
/// }
/// ```
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Channel this sensor provides.
    fn channel(&self) -> Channel;

    /// Read the current value.
    ///
    /// Implementations may block for a long time; callers bound the read
    /// with [`crate::read_with_timeout`] and drop the future on expiry.
    async fn read(&self) -> Result<Option<f64>>;
}

/// A load cell amplifier that yields raw ADC counts.
#[async_trait]
pub trait WeightSensor: Send + Sync {
    /// Read `count` raw samples. Implementations may return fewer samples
    /// than requested if some conversions failed.
    async fn read_raw_samples(&self, count: usize) -> Result<Vec<f64>>;
}

/// Destination for recoverable failures.
///
/// Recording never fails from the caller's point of view: sinks swallow
/// their own errors so a broken log never stops the pipeline.
pub trait ErrorSink: Send + Sync {
    /// Record a failure with a stable code and a human-readable message.
    fn record(&self, code: &str, message: &str);
}

#[async_trait]
impl<T: Sensor + ?Sized> Sensor for Arc<T> {
    fn channel(&self) -> Channel {
        (**self).channel()
    }

    async fn read(&self) -> Result<Option<f64>> {
        (**self).read().await
    }
}

#[async_trait]
impl<T: WeightSensor + ?Sized> WeightSensor for Arc<T> {
    async fn read_raw_samples(&self, count: usize) -> Result<Vec<f64>> {
        (**self).read_raw_samples(count).await
    }
}

impl<T: ErrorSink + ?Sized> ErrorSink for Arc<T> {
    fn record(&self, code: &str, message: &str) {
        (**self).record(code, message)
    }
}
