//! Application state shared by the collector and the API handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hivewatch_core::{ErrorSink, ProfileFile, codes};
use hivewatch_store::Store;
use hivewatch_types::CalibrationProfile;

use crate::collector::CycleReport;
use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The record store. Locked per query, never across a submit.
    pub store: Mutex<Store>,
    /// Configuration (RwLock for runtime updates such as the interval).
    pub config: RwLock<Config>,
    /// Current load cell calibration; `None` while uncalibrated.
    pub calibration: RwLock<Option<CalibrationProfile>>,
    /// Where recoverable failures are reported.
    pub sink: Arc<dyn ErrorSink>,
    /// Collector control state.
    pub collector: CollectorState,
}

impl AppState {
    /// Create new application state. The calibration starts empty; call
    /// [`AppState::reload_calibration`] to load it from disk.
    pub fn new(store: Store, config: Config, sink: Arc<dyn ErrorSink>) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            config: RwLock::new(config),
            calibration: RwLock::new(None),
            sink,
            collector: CollectorState::new(),
        })
    }

    /// Re-read the calibration file and swap the active profile.
    ///
    /// A missing file makes the service uncalibrated. A file that cannot be
    /// read or parsed is reported and the current profile is kept.
    pub async fn reload_calibration(&self) -> hivewatch_core::Result<Option<CalibrationProfile>> {
        let path = self.config.read().await.calibration.path.clone();
        match ProfileFile::new(&path).load() {
            Ok(profile) => {
                match &profile {
                    Some(p) => info!(
                        "Loaded calibration from {} (reference unit {}, zero offset {})",
                        path.display(),
                        p.reference_unit,
                        p.zero_offset
                    ),
                    None => warn!(
                        "No calibration at {}, weight will not be recorded",
                        path.display()
                    ),
                }
                *self.calibration.write().await = profile.clone();
                Ok(profile)
            }
            Err(e) => {
                self.sink.record(
                    codes::CALIBRATION_LOAD_ERROR,
                    &format!("{}: {}", path.display(), e),
                );
                Err(e)
            }
        }
    }

    /// Snapshot of the active calibration profile.
    pub async fn calibration(&self) -> Option<CalibrationProfile> {
        self.calibration.read().await.clone()
    }
}

/// State for tracking and controlling the collector.
pub struct CollectorState {
    running: AtomicBool,
    /// When the collector was started (Unix timestamp).
    started_at: AtomicU64,
    cycles: AtomicU64,
    /// Cancelled on shutdown; the loop exits between cycles.
    shutdown: CancellationToken,
    /// Report of the most recent cycle.
    pub last_cycle: RwLock<Option<CycleReport>>,
}

impl CollectorState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            last_cycle: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Number of completed cycles since start.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Store the report of a finished cycle.
    pub async fn record_cycle(&self, report: CycleReport) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        *self.last_cycle.write().await = Some(report);
    }

    /// Token cancelled when shutdown is requested.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask the collector to stop after the current cycle.
    pub fn signal_stop(&self) {
        self.shutdown.cancel();
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new()
    }
}
