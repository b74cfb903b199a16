//! The collection loop.
//!
//! One cycle reads every configured sensor, converts the weight through the
//! active calibration, appends the record to the store, drains the unsynced
//! backlog and prunes expired records. Cycles never overlap: the next one is
//! scheduled only after the previous one returned.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hivewatch_core::{Error as CoreError, JsonErrorLog, codes, read_with_timeout, weigh};
use hivewatch_store::NewRecord;
use hivewatch_types::{Channel, Readings};

use crate::sensors::SensorSet;
use crate::state::AppState;
use crate::sync::{SyncEngine, SyncReport};
use crate::uploader::Submitter;

/// Outcome of one collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Id of the stored record, if one was written.
    pub record_id: Option<i64>,
    /// Channels with a value this cycle.
    pub present: Vec<Channel>,
    /// Configured channels without a value this cycle.
    pub missing: Vec<Channel>,
    /// Sync outcome; `None` when uploads are disabled.
    pub sync: Option<SyncReport>,
    /// Records removed by retention pruning.
    pub pruned: usize,
}

/// Collector errors.
///
/// Per-channel and per-record failures are reported to the error sink and
/// never surface here; only a store failure aborts the cycle.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(#[from] hivewatch_store::Error),
}

/// Runs collection cycles against the shared state.
pub struct Collector {
    state: Arc<AppState>,
    sensors: SensorSet,
    submitter: Option<Arc<dyn Submitter>>,
    error_log: Option<Arc<JsonErrorLog>>,
}

impl Collector {
    pub fn new(
        state: Arc<AppState>,
        sensors: SensorSet,
        submitter: Option<Arc<dyn Submitter>>,
    ) -> Self {
        Self {
            state,
            sensors,
            submitter,
            error_log: None,
        }
    }

    /// Prune this error log with the configured retention each cycle.
    pub fn with_error_log(mut self, log: Arc<JsonErrorLog>) -> Self {
        self.error_log = Some(log);
        self
    }

    /// Run cycles until shutdown is requested.
    ///
    /// The interval is re-read from the configuration before every sleep, so
    /// changes made through the API apply to the next cycle. After a store
    /// failure the loop waits for the retry delay instead.
    pub async fn run(self) {
        let cancel = self.state.collector.shutdown_token();
        self.state.collector.set_running(true);
        info!(
            "Starting collector ({} channel(s), weight: {}, uploads: {})",
            self.sensors.channels.len(),
            self.sensors.weight.is_some(),
            self.submitter.is_some()
        );

        let mut consecutive_failures = 0u32;
        loop {
            let started = Instant::now();

            let wait = match self.run_cycle(&cancel).await {
                Ok(report) => {
                    consecutive_failures = 0;
                    self.state.collector.record_cycle(report).await;
                    let interval = self.state.config.read().await.collector.interval();
                    interval.saturating_sub(started.elapsed())
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.state.sink.record(codes::STORE_UNAVAILABLE, &e.to_string());
                    if consecutive_failures <= 3 {
                        warn!("Cycle failed: {} (attempt {})", e, consecutive_failures);
                    } else if consecutive_failures == 4 {
                        error!(
                            "Cycle failed {} times in a row, will keep retrying",
                            consecutive_failures
                        );
                    }
                    self.state.config.read().await.collector.store_retry_delay()
                }
            };

            debug!("Next cycle in {:?}", wait);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.state.collector.set_running(false);
        info!("Collector stopped");
    }

    /// Run one collection cycle.
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CollectorError> {
        let config = self.state.config.read().await.clone();
        let mut report = CycleReport {
            started_at: Some(OffsetDateTime::now_utc()),
            ..Default::default()
        };

        let readings = self
            .read_sensors(config.collector.sensor_timeout(), config.collector.weight_samples)
            .await;
        report.present = readings.present().map(|(c, _)| c).collect();
        report.missing = self
            .configured_channels()
            .filter(|c| readings.get(*c).is_none())
            .collect();

        let record = NewRecord::new(readings);
        if !record.has_data() {
            self.state.sink.record(
                codes::DATA_VALIDATION_FAIL,
                "no sensor produced a value, nothing stored",
            );
        } else {
            let inserted = self.state.store.lock().await.insert(&record);
            match inserted {
                Ok(id) => {
                    debug!("Stored record {} ({} channels)", id, report.present.len());
                    report.record_id = Some(id);
                }
                Err(hivewatch_store::Error::InvalidRecord(reason)) => {
                    self.state
                        .sink
                        .record(codes::DATA_VALIDATION_ERROR, &reason);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(submitter) = &self.submitter {
            let engine = SyncEngine::new(
                &self.state.store,
                self.state.sink.as_ref(),
                config.upload.timeout(),
            );
            report.sync = Some(engine.run_sync_cycle(submitter.as_ref(), cancel).await?);
        }

        report.pruned = self
            .state
            .store
            .lock()
            .await
            .prune_older_than(config.storage.retention())?;
        if report.pruned > 0 {
            info!("Pruned {} expired records", report.pruned);
        }

        if let Some(log) = &self.error_log {
            match log.prune_older_than(config.error_log.retention()) {
                Ok(0) => {}
                Ok(n) => debug!("Pruned {} expired error log entries", n),
                Err(e) => warn!("Failed to prune error log: {}", e),
            }
        }

        Ok(report)
    }

    /// Read every configured channel once. Failed, empty and timed-out
    /// channels are left missing and reported to the sink.
    async fn read_sensors(&self, timeout: Duration, weight_samples: usize) -> Readings {
        let mut readings = Readings::new();

        for sensor in &self.sensors.channels {
            let channel = sensor.channel();
            match read_with_timeout(sensor.as_ref(), timeout).await {
                Ok(Some(value)) => readings.set(channel, Some(value)),
                Ok(None) => self
                    .state
                    .sink
                    .record(&channel.missing_code(), "sensor returned no value"),
                Err(e) => self
                    .state
                    .sink
                    .record(&channel.missing_code(), &e.to_string()),
            }
        }

        if let Some(sensor) = &self.sensors.weight {
            let profile = self.state.calibration().await;
            match weigh(sensor.as_ref(), profile.as_ref(), weight_samples, timeout).await {
                Ok(reading) => readings.set(Channel::Weight, Some(reading.value)),
                Err(CoreError::Conversion(e)) => self
                    .state
                    .sink
                    .record(codes::WEIGHT_UNCALIBRATED, &e.to_string()),
                Err(e) => self
                    .state
                    .sink
                    .record(&Channel::Weight.missing_code(), &e.to_string()),
            }
        }

        readings
    }

    fn configured_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.sensors
            .channels
            .iter()
            .map(|s| s.channel())
            .chain(self.sensors.weight.as_ref().map(|_| Channel::Weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use hivewatch_core::{MemorySink, MockSensor, MockWeightSensor, Sensor, WeightSensor};
    use hivewatch_store::Store;
    use hivewatch_types::CalibrationProfile;

    struct Harness {
        state: Arc<AppState>,
        sink: Arc<MemorySink>,
        temp: Arc<MockSensor>,
        weight: Arc<MockWeightSensor>,
        collector: Collector,
    }

    fn harness() -> Harness {
        let sink = Arc::new(MemorySink::new());
        let state = AppState::new(
            Store::open_in_memory().unwrap(),
            Config::default(),
            sink.clone(),
        );
        let temp = Arc::new(MockSensor::new(Channel::TempInside, 34.5));
        let weight = Arc::new(MockWeightSensor::new(52_000.0 - 21.7 * 2500.0));
        let sensors = SensorSet {
            channels: vec![temp.clone() as Arc<dyn Sensor>],
            weight: Some(weight.clone() as Arc<dyn WeightSensor>),
        };
        let collector = Collector::new(Arc::clone(&state), sensors, None);
        Harness {
            state,
            sink,
            temp,
            weight,
            collector,
        }
    }

    async fn calibrate(state: &AppState) {
        *state.calibration.write().await = Some(CalibrationProfile::new(-21.7, 52_000.0, 2500.0));
    }

    #[tokio::test]
    async fn test_cycle_stores_calibrated_weight() {
        let h = harness();
        calibrate(&h.state).await;

        let report = h.collector.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.present, vec![Channel::Weight, Channel::TempInside]);
        assert!(report.missing.is_empty());
        assert!(report.sync.is_none());

        let record = h
            .state
            .store
            .lock()
            .await
            .get(report.record_id.unwrap())
            .unwrap()
            .unwrap();
        assert!((record.readings.weight.unwrap() - 2500.0).abs() < 1e-6);
        assert_eq!(record.readings.temp_inside, Some(34.5));
        assert!(!record.synced);
        assert!(h.sink.is_empty());
    }

    #[tokio::test]
    async fn test_uncalibrated_weight_is_missing() {
        let h = harness();

        let report = h.collector.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.missing, vec![Channel::Weight]);
        assert_eq!(h.sink.count(codes::WEIGHT_UNCALIBRATED), 1);

        let record = h.state.store.lock().await.fetch_latest(1).unwrap().remove(0);
        assert_eq!(record.readings.weight, None);
        assert_eq!(record.readings.temp_inside, Some(34.5));
    }

    #[tokio::test]
    async fn test_failed_channel_does_not_block_others() {
        let h = harness();
        calibrate(&h.state).await;
        h.temp.set_should_fail(true);

        let report = h.collector.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.missing, vec![Channel::TempInside]);
        assert!(report.record_id.is_some());
        assert_eq!(h.sink.count("SENSOR_TEMP_INSIDE_MISSING"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_weight_read_is_abandoned() {
        let h = harness();
        calibrate(&h.state).await;
        h.weight.set_latency(Duration::from_secs(3600));

        let report = h.collector.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.missing, vec![Channel::Weight]);
        assert_eq!(h.sink.count("SENSOR_WEIGHT_MISSING"), 1);
        assert!(report.record_id.is_some());
    }

    #[tokio::test]
    async fn test_empty_cycle_stores_nothing() {
        let h = harness();
        h.temp.set_value(None);
        h.weight.set_should_fail(true);

        let report = h.collector.run_cycle(&CancellationToken::new()).await.unwrap();
        assert!(report.record_id.is_none());
        assert_eq!(h.sink.count(codes::DATA_VALIDATION_FAIL), 1);
        assert_eq!(h.state.store.lock().await.count(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_value_rejects_record() {
        let h = harness();
        calibrate(&h.state).await;
        h.temp.set_value(Some(f64::NAN));

        let report = h.collector.run_cycle(&CancellationToken::new()).await.unwrap();
        assert!(report.record_id.is_none());
        assert_eq!(h.sink.count(codes::DATA_VALIDATION_ERROR), 1);
    }

    #[tokio::test]
    async fn test_cycle_prunes_expired_records() {
        let h = harness();
        calibrate(&h.state).await;
        let old = OffsetDateTime::now_utc() - time::Duration::days(200);
        h.state
            .store
            .lock()
            .await
            .insert(&NewRecord::at(old, Readings::new().with(Channel::Pressure, 1000.0)))
            .unwrap();

        let report = h.collector.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(h.state.store.lock().await.count(None).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cycle_with_retention_beyond_date_range() {
        let h = harness();
        calibrate(&h.state).await;
        h.state.config.write().await.storage.retention_days = 5_000_000;
        assert!(h.state.config.read().await.validate().is_err());

        let report = h.collector.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.pruned, 0);
        assert!(report.record_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_while_store_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        let sink = Arc::new(MemorySink::new());
        let state = AppState::new(Store::open(&path).unwrap(), Config::default(), sink.clone());

        // Break the store underneath the open connection
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE records;")
            .unwrap();

        let temp = Arc::new(MockSensor::new(Channel::TempInside, 34.5));
        let sensors = SensorSet {
            channels: vec![temp.clone() as Arc<dyn Sensor>],
            weight: None,
        };
        let task = tokio::spawn(Collector::new(Arc::clone(&state), sensors, None).run());

        // Failed cycles at 0, 30, 60, 90 and 120s with the default 30s retry delay
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(state.collector.is_running());
        assert_eq!(sink.count(codes::STORE_UNAVAILABLE), 5);
        assert_eq!(temp.read_count(), 5);
        assert_eq!(state.collector.cycles(), 0);

        state.collector.signal_stop();
        task.await.unwrap();
        assert!(!state.collector.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness();
        let state = Arc::clone(&h.state);
        let task = tokio::spawn(h.collector.run());

        // Let two cycles complete at the default 300s interval
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(state.collector.is_running());
        state.collector.signal_stop();
        task.await.unwrap();

        assert!(!state.collector.is_running());
        assert_eq!(state.collector.cycles(), 2);
        assert_eq!(state.store.lock().await.count(None).unwrap(), 2);
    }
}
