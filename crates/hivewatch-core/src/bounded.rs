//! Deadline-bounded sensor reads.
//!
//! Hardware reads can hang indefinitely. Each read runs under
//! [`tokio::time::timeout`]; when the deadline passes the read future is
//! dropped and the channel is reported as a [`Error::Timeout`].

use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::{Sensor, WeightSensor};

/// Default per-channel read deadline.
pub const DEFAULT_SENSOR_TIMEOUT: Duration = Duration::from_secs(3);

/// Read a sensor, abandoning the read after `timeout`.
pub async fn read_with_timeout<S: Sensor + ?Sized>(
    sensor: &S,
    timeout: Duration,
) -> Result<Option<f64>> {
    match tokio::time::timeout(timeout, sensor.read()).await {
        Ok(result) => result,
        Err(_) => {
            debug!("Read of {} abandoned after {:?}", sensor.channel(), timeout);
            Err(Error::timeout(format!("read {}", sensor.channel()), timeout))
        }
    }
}

/// Read raw load-cell samples, abandoning the batch after `timeout`.
pub async fn read_samples_with_timeout<W: WeightSensor + ?Sized>(
    sensor: &W,
    count: usize,
    timeout: Duration,
) -> Result<Vec<f64>> {
    tokio::time::timeout(timeout, sensor.read_raw_samples(count))
        .await
        .map_err(|_| Error::timeout(format!("read {count} weight samples"), timeout))?
}
