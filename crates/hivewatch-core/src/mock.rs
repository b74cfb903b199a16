//! Mock sensors and sinks for testing.
//!
//! These types implement the [`Sensor`], [`WeightSensor`] and [`ErrorSink`]
//! traits so the collector and calibrator can run without hardware.
//!
//! # Features
//!
//! - **Failure injection**: permanent or a fixed number of transient failures
//! - **Latency simulation**: artificial delays to exercise read deadlines
//! - **Signal shaping**: load-cell level, uniform noise and one-shot spikes

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use hivewatch_types::Channel;

use crate::error::{Error, Result};
use crate::traits::{ErrorSink, Sensor, WeightSensor};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A mock single-value sensor.
///
/// ```
/// use hivewatch_core::{MockSensor, Sensor};
/// use hivewatch_types::Channel;
///
/// #[tokio::main]
/// async fn main() {
///     let sensor = MockSensor::new(Channel::Pressure, 1013.2);
///     assert_eq!(sensor.read().await.unwrap(), Some(1013.2));
/// }
/// ```
#[derive(Debug)]
pub struct MockSensor {
    channel: Channel,
    value: Mutex<Option<f64>>,
    should_fail: AtomicBool,
    remaining_failures: AtomicU32,
    latency_ms: AtomicU64,
    read_count: AtomicU32,
}

impl MockSensor {
    /// Create a sensor that always yields `value`.
    pub fn new(channel: Channel, value: f64) -> Self {
        Self::with_value(channel, Some(value))
    }

    /// Create a sensor with no value (hardware not fitted).
    pub fn empty(channel: Channel) -> Self {
        Self::with_value(channel, None)
    }

    fn with_value(channel: Channel, value: Option<f64>) -> Self {
        Self {
            channel,
            value: Mutex::new(value),
            should_fail: AtomicBool::new(false),
            remaining_failures: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
            read_count: AtomicU32::new(0),
        }
    }

    /// Change the value returned by subsequent reads.
    pub fn set_value(&self, value: Option<f64>) {
        *lock(&self.value) = value;
    }

    /// Make every read fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` reads, then recover.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Delay each read by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of reads started.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sensor for MockSensor {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn read(&self) -> Result<Option<f64>> {
        self.read_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.remaining_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::sensor_unavailable(self.channel, "mock transient failure"));
        }
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::sensor_unavailable(self.channel, "mock failure"));
        }

        Ok(*lock(&self.value))
    }
}

/// A mock load-cell amplifier producing raw counts around a settable level.
#[derive(Debug)]
pub struct MockWeightSensor {
    level: AtomicU64,
    noise: AtomicU64,
    spikes: Mutex<Vec<f64>>,
    max_samples: AtomicUsize,
    should_fail: AtomicBool,
    latency_ms: AtomicU64,
    batch_count: AtomicU32,
}

impl MockWeightSensor {
    /// Create a noiseless sensor reading `level` raw counts.
    pub fn new(level: f64) -> Self {
        Self {
            level: AtomicU64::new(level.to_bits()),
            noise: AtomicU64::new(0f64.to_bits()),
            spikes: Mutex::new(Vec::new()),
            max_samples: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            batch_count: AtomicU32::new(0),
        }
    }

    /// Set the raw level, e.g. when a weight is placed on the scale.
    pub fn set_level(&self, level: f64) {
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Current raw level.
    pub fn level(&self) -> f64 {
        f64::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Add uniform noise of +/- `amplitude` counts to every sample.
    pub fn set_noise(&self, amplitude: f64) {
        self.noise.store(amplitude.abs().to_bits(), Ordering::Relaxed);
    }

    /// Replace the first samples of the next batch with these values.
    pub fn push_spikes(&self, spikes: impl IntoIterator<Item = f64>) {
        lock(&self.spikes).extend(spikes);
    }

    /// Return at most `max` samples per batch (0 = unlimited).
    pub fn set_max_samples(&self, max: usize) {
        self.max_samples.store(max, Ordering::Relaxed);
    }

    /// Make every batch fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Delay each batch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of batches requested.
    pub fn batch_count(&self) -> u32 {
        self.batch_count.load(Ordering::Relaxed)
    }

    fn generate(&self, count: usize) -> Vec<f64> {
        let level = self.level();
        let noise = f64::from_bits(self.noise.load(Ordering::Relaxed));
        let max = self.max_samples.load(Ordering::Relaxed);
        let count = if max > 0 { count.min(max) } else { count };

        let mut rng = rand::rng();
        let mut samples: Vec<f64> = (0..count)
            .map(|_| {
                if noise > 0.0 {
                    level + rng.random_range(-noise..=noise)
                } else {
                    level
                }
            })
            .collect();

        let mut spikes = lock(&self.spikes);
        let n = spikes.len().min(samples.len());
        for (slot, spike) in samples.iter_mut().zip(spikes.drain(..n)) {
            *slot = spike;
        }
        samples
    }
}

#[async_trait]
impl WeightSensor for MockWeightSensor {
    async fn read_raw_samples(&self, count: usize) -> Result<Vec<f64>> {
        self.batch_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::sensor_unavailable(Channel::Weight, "mock failure"));
        }

        Ok(self.generate(count))
    }
}

/// An in-memory error sink that keeps every recorded failure.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded `(code, message)` pairs, oldest first.
    pub fn entries(&self) -> Vec<(String, String)> {
        lock(&self.entries).clone()
    }

    /// Recorded codes, oldest first.
    pub fn codes(&self) -> Vec<String> {
        lock(&self.entries).iter().map(|(c, _)| c.clone()).collect()
    }

    /// Number of entries with the given code.
    pub fn count(&self, code: &str) -> usize {
        lock(&self.entries).iter().filter(|(c, _)| c == code).count()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl ErrorSink for MemorySink {
    fn record(&self, code: &str, message: &str) {
        lock(&self.entries).push((code.to_string(), message.to_string()));
    }
}
