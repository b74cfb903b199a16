//! Sensor adapters backed by sysfs-style files.
//!
//! Linux IIO drivers expose each channel as a small text file holding one
//! number (`in_temp_input`, `in_humidityrelative_input`, `in_voltage0_raw`).
//! Reading the file triggers a conversion, so a faulty device can make the
//! read hang; the collector bounds every read with a timeout.
//!
//! A timed-out read cannot be interrupted: its blocking thread stays parked
//! in the kernel until the driver returns. Each adapter therefore owns a
//! single [`ReadSlot`], and while an abandoned read still occupies it new
//! reads fail immediately instead of parking another thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use hivewatch_core::{Error, Result, Sensor, WeightSensor};
use hivewatch_types::Channel;

use crate::config::{Config, SensorConfig};

/// At most one blocking read in flight per device.
#[derive(Debug, Clone, Default)]
struct ReadSlot {
    busy: Arc<AtomicBool>,
}

/// Frees the slot when the blocking closure finishes or is dropped unrun.
struct SlotRelease(Arc<AtomicBool>);

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReadSlot {
    async fn run<T, F>(&self, read: F) -> std::result::Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, String> + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err("previous read has not returned yet".to_string());
        }

        let release = SlotRelease(Arc::clone(&self.busy));
        tokio::task::spawn_blocking(move || {
            let _release = release;
            read()
        })
        .await
        .map_err(|e| format!("read task failed: {}", e))?
    }
}

/// A scalar channel read from a file, as `raw * scale + offset`.
#[derive(Debug, Clone)]
pub struct SysfsChannel {
    channel: Channel,
    path: PathBuf,
    scale: f64,
    offset: f64,
    slot: ReadSlot,
}

impl SysfsChannel {
    pub fn new(channel: Channel, path: impl Into<PathBuf>) -> Self {
        Self {
            channel,
            path: path.into(),
            scale: 1.0,
            offset: 0.0,
            slot: ReadSlot::default(),
        }
    }

    pub fn from_config(channel: Channel, config: &SensorConfig) -> Self {
        Self::new(channel, &config.path).with_scale(config.scale, config.offset)
    }

    pub fn with_scale(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sensor for SysfsChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn read(&self) -> Result<Option<f64>> {
        let path = self.path.clone();
        let raw = self
            .slot
            .run(move || read_number(&path))
            .await
            .map_err(|reason| Error::sensor_unavailable(self.channel, reason))?;
        Ok(Some(raw * self.scale + self.offset))
    }
}

/// HX711 load cell amplifier exposed as a raw IIO voltage channel.
#[derive(Debug, Clone)]
pub struct SysfsWeightSensor {
    path: PathBuf,
    slot: ReadSlot,
}

impl SysfsWeightSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            slot: ReadSlot::default(),
        }
    }
}

#[async_trait]
impl WeightSensor for SysfsWeightSensor {
    async fn read_raw_samples(&self, count: usize) -> Result<Vec<f64>> {
        let path = self.path.clone();
        self.slot
            .run(move || read_samples(&path, count))
            .await
            .map_err(|reason| Error::sensor_unavailable(Channel::Weight, reason))
    }
}

fn read_samples(path: &Path, count: usize) -> std::result::Result<Vec<f64>, String> {
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        match read_number(path) {
            Ok(value) => samples.push(value),
            Err(reason) if samples.is_empty() && !path.exists() => return Err(reason),
            // A single failed conversion drops that sample only
            Err(reason) => debug!("Skipping load cell sample: {}", reason),
        }
    }
    Ok(samples)
}

fn read_number(path: &Path) -> std::result::Result<f64, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let trimmed = content.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| format!("{}: not a number: {:?}", path.display(), trimmed))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("{}: non-finite value {}", path.display(), value))
    }
}

/// The sensors described by a configuration.
#[derive(Clone, Default)]
pub struct SensorSet {
    pub channels: Vec<Arc<dyn Sensor>>,
    pub weight: Option<Arc<dyn WeightSensor>>,
}

impl SensorSet {
    pub fn from_config(config: &Config) -> Self {
        let channels = config
            .sensor_channels()
            .map(|(channel, sensor)| {
                Arc::new(SysfsChannel::from_config(channel, sensor)) as Arc<dyn Sensor>
            })
            .collect();
        let weight = config
            .weight
            .as_ref()
            .map(|w| Arc::new(SysfsWeightSensor::new(&w.path)) as Arc<dyn WeightSensor>);
        Self { channels, weight }
    }
}

impl std::fmt::Debug for SensorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels: Vec<_> = self.channels.iter().map(|s| s.channel()).collect();
        f.debug_struct("SensorSet")
            .field("channels", &channels)
            .field("weight", &self.weight.is_some())
            .finish()
    }
}
