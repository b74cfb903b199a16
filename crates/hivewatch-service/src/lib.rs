//! Collector loop, store-and-forward sync and local REST API for HiveWatch.
//!
//! This crate provides a service that:
//! - Reads the configured sensors on a fixed interval
//! - Converts load-cell counts to weight through the active calibration
//! - Buffers every record in the local store until the endpoint acknowledges it
//! - Drains the unsynced backlog each cycle, oldest first
//! - Prunes records past the retention window, synced or not
//! - Exposes a small REST API for inspecting the device
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Collector state, record counts and last cycle
//! - `GET /api/records` - Latest records
//! - `GET /api/calibration` - Active calibration profile
//! - `GET|PUT /api/interval` - Collection interval
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/hivewatch/hivewatch.toml`:
//!
//! ```toml
//! [collector]
//! interval_secs = 300
//!
//! [upload]
//! kind = "http"
//! url = "https://collector.example.org/api/records"
//!
//! [sensors.temp_inside]
//! path = "/sys/bus/iio/devices/iio:device0/in_temp_input"
//! scale = 0.001
//!
//! [weight]
//! path = "/sys/bus/iio/devices/iio:device1/in_voltage0_raw"
//! ```

pub mod api;
pub mod collector;
pub mod config;
pub mod sensors;
pub mod state;
pub mod sync;
pub mod uploader;

pub use collector::{Collector, CollectorError, CycleReport};
pub use config::{
    CalibrationConfig, CollectorConfig, Config, ConfigError, ErrorLogConfig, SensorConfig,
    ServerConfig, StorageConfig, UploadConfig, UploadKind, WeightConfig,
};
pub use sensors::{SensorSet, SysfsChannel, SysfsWeightSensor};
pub use state::{AppState, CollectorState};
pub use sync::{SyncEngine, SyncReport};
pub use uploader::{
    HttpSubmitter, SubmitError, Submitter, ThingSpeakSubmitter, build_submitter,
};
