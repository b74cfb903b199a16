//! Service configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hivewatch_core::CalibrationOptions;
use hivewatch_types::{CalibrationMode, Channel};

/// Minimum collection interval in seconds.
pub const MIN_INTERVAL: u64 = 10;
/// Maximum collection interval in seconds (1 hour).
pub const MAX_INTERVAL: u64 = 3600;
/// Maximum retention for records and logged errors (100 years).
pub const MAX_RETENTION_DAYS: u64 = 36_500;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST API settings.
    pub server: ServerConfig,
    /// Record store settings.
    pub storage: StorageConfig,
    /// Collection loop settings.
    pub collector: CollectorConfig,
    /// Remote endpoint settings.
    pub upload: UploadConfig,
    /// Calibration file and sampling settings.
    pub calibration: CalibrationConfig,
    /// Persistent error log settings.
    pub error_log: ErrorLogConfig,
    /// Scalar sensor channels, keyed by channel name (e.g. `temp_inside`).
    pub sensors: BTreeMap<String, SensorConfig>,
    /// Load cell amplifier.
    pub weight: Option<WeightConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use hivewatch_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.collector.validate());
        errors.extend(self.upload.validate());
        errors.extend(self.calibration.validate());
        errors.extend(self.error_log.validate());

        for (name, sensor) in &self.sensors {
            let prefix = format!("sensors.{name}");
            match name.parse::<Channel>() {
                Ok(Channel::Weight) => errors.push(ValidationError {
                    field: prefix.clone(),
                    message: "the weight channel is configured under [weight]".to_string(),
                }),
                Ok(_) => {}
                Err(e) => errors.push(ValidationError {
                    field: prefix.clone(),
                    message: e.to_string(),
                }),
            }
            errors.extend(sensor.validate(&prefix));
        }
        if let Some(weight) = &self.weight
            && weight.path.as_os_str().is_empty()
        {
            errors.push(ValidationError {
                field: "weight.path".to_string(),
                message: "load cell path cannot be empty".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Configured scalar channels. Unknown names are skipped; [`Config::validate`]
    /// reports them.
    pub fn sensor_channels(&self) -> impl Iterator<Item = (Channel, &SensorConfig)> {
        self.sensors
            .iter()
            .filter_map(|(name, sensor)| Some((name.parse::<Channel>().ok()?, sensor)))
            .filter(|(channel, _)| *channel != Channel::Weight)
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// REST API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            }),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: "port cannot be 0".to_string(),
                }),
                Err(_) => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!("invalid port '{}': must be a number 1-65535", port),
                }),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Records older than this many days are deleted, synced or not.
    pub retention_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: hivewatch_store::default_db_path(),
            retention_days: 180,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }
        if let Err(message) = validate_retention(self.retention_days) {
            errors.push(ValidationError {
                field: "storage.retention_days".to_string(),
                message,
            });
        }

        errors
    }

    /// Retention window as a duration.
    pub fn retention(&self) -> Duration {
        days(self.retention_days)
    }
}

/// Collection loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Seconds between the start of consecutive cycles.
    pub interval_secs: u64,
    /// Deadline for a single sensor read, in milliseconds.
    pub sensor_timeout_ms: u64,
    /// Raw load-cell samples averaged per cycle.
    pub weight_samples: usize,
    /// Back-off after the store could not be used, in seconds.
    pub store_retry_delay_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            sensor_timeout_ms: 3000,
            weight_samples: 5,
            store_retry_delay_secs: 30,
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(message) = validate_interval(self.interval_secs) {
            errors.push(ValidationError {
                field: "collector.interval_secs".to_string(),
                message,
            });
        }
        if self.sensor_timeout_ms == 0 {
            errors.push(ValidationError {
                field: "collector.sensor_timeout_ms".to_string(),
                message: "sensor timeout cannot be 0".to_string(),
            });
        }
        if self.weight_samples == 0 {
            errors.push(ValidationError {
                field: "collector.weight_samples".to_string(),
                message: "at least one weight sample is required".to_string(),
            });
        }

        errors
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_secs(self.store_retry_delay_secs)
    }
}

/// Check a collection interval against [`MIN_INTERVAL`] and [`MAX_INTERVAL`].
pub fn validate_interval(secs: u64) -> Result<(), String> {
    if secs < MIN_INTERVAL {
        Err(format!(
            "interval {}s is too short (minimum {}s)",
            secs, MIN_INTERVAL
        ))
    } else if secs > MAX_INTERVAL {
        Err(format!(
            "interval {}s is too long (maximum {}s)",
            secs, MAX_INTERVAL
        ))
    } else {
        Ok(())
    }
}

/// Remote endpoint flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    /// JSON POST of the record payload.
    #[default]
    Http,
    /// ThingSpeak channel update.
    Thingspeak,
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub kind: UploadKind,
    /// Endpoint URL. Uploads are disabled while this is unset.
    pub url: Option<String>,
    /// Write key, required for ThingSpeak.
    pub api_key: Option<String>,
    /// Deadline for one submit, in seconds.
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            kind: UploadKind::Http,
            url: None,
            api_key: None,
            timeout_secs: 10,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(url) = &self.url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            errors.push(ValidationError {
                field: "upload.url".to_string(),
                message: format!("URL must start with http:// or https://, got: {}", url),
            });
        }
        if self.kind == UploadKind::Thingspeak
            && self.url.is_some()
            && self.api_key.as_deref().is_none_or(str::is_empty)
        {
            errors.push(ValidationError {
                field: "upload.api_key".to_string(),
                message: "ThingSpeak uploads need a write API key".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "upload.timeout_secs".to_string(),
                message: "submit timeout cannot be 0".to_string(),
            });
        }

        errors
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Calibration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Calibration profile file.
    pub path: PathBuf,
    pub samples_per_step: usize,
    pub min_samples: usize,
    pub test_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("calibration.json"),
            samples_per_step: 150,
            min_samples: 10,
            test_samples: 15,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "calibration.path".to_string(),
                message: "calibration file path cannot be empty".to_string(),
            });
        }
        if self.min_samples == 0 {
            errors.push(ValidationError {
                field: "calibration.min_samples".to_string(),
                message: "minimum sample count cannot be 0".to_string(),
            });
        }
        if self.samples_per_step < self.min_samples {
            errors.push(ValidationError {
                field: "calibration.samples_per_step".to_string(),
                message: format!(
                    "{} samples per step is below the minimum of {}",
                    self.samples_per_step, self.min_samples
                ),
            });
        }
        if self.test_samples == 0 {
            errors.push(ValidationError {
                field: "calibration.test_samples".to_string(),
                message: "self-test sample count cannot be 0".to_string(),
            });
        }

        errors
    }

    /// Calibrator options for the given mode.
    pub fn options(&self, mode: CalibrationMode) -> CalibrationOptions {
        CalibrationOptions {
            mode,
            samples_per_step: self.samples_per_step,
            min_samples: self.min_samples,
            test_samples: self.test_samples,
            ..CalibrationOptions::default()
        }
    }
}

/// Persistent error log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorLogConfig {
    /// JSON log file. When unset, failures are only traced.
    pub path: Option<PathBuf>,
    pub retention_days: u64,
}

impl Default for ErrorLogConfig {
    fn default() -> Self {
        Self {
            path: Some(data_dir().join("errors.json")),
            retention_days: 180,
        }
    }
}

impl ErrorLogConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(message) = validate_retention(self.retention_days) {
            errors.push(ValidationError {
                field: "error_log.retention_days".to_string(),
                message,
            });
        }

        errors
    }

    pub fn retention(&self) -> Duration {
        days(self.retention_days)
    }
}

/// A scalar channel read from a sysfs-style file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// File holding the raw value (e.g. an IIO `in_temp_input`).
    pub path: PathBuf,
    /// Multiplier applied to the raw value.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Added after scaling.
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl SensorConfig {
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: format!("{}.path", prefix),
                message: "sensor path cannot be empty".to_string(),
            });
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            errors.push(ValidationError {
                field: format!("{}.scale", prefix),
                message: format!("scale must be a finite non-zero number, got {}", self.scale),
            });
        }
        if !self.offset.is_finite() {
            errors.push(ValidationError {
                field: format!("{}.offset", prefix),
                message: "offset must be finite".to_string(),
            });
        }

        errors
    }
}

/// Load cell amplifier exposed as a raw IIO channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Raw counts file (e.g. an HX711 `in_voltage0_raw`).
    pub path: PathBuf,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `sensors.temp_inside.path`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

fn validate_retention(days: u64) -> Result<(), String> {
    if days == 0 {
        return Err("retention must be at least 1 day".to_string());
    }
    if days > MAX_RETENTION_DAYS {
        return Err(format!(
            "retention must be at most {} days",
            MAX_RETENTION_DAYS
        ));
    }
    Ok(())
}

fn days(n: u64) -> Duration {
    n.checked_mul(24 * 60 * 60)
        .map(Duration::from_secs)
        .unwrap_or(Duration::MAX)
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hivewatch")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hivewatch")
        .join("hivewatch.toml")
}
