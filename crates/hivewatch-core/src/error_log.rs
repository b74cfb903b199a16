//! Persistent log of recoverable failures.
//!
//! [`JsonErrorLog`] keeps a JSON array of `{code, message, timestamp}`
//! entries on disk so failures can be inspected after the fact on a device
//! with no console attached. Entries older than the retention window are
//! pruned by the collector each cycle.
//!
//! Failures of the log itself are reported through `tracing` and otherwise
//! ignored.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use crate::error::Result;
use crate::traits::ErrorSink;
use crate::util::write_atomic;

/// Stable error codes written to the log.
pub mod codes {
    /// A cycle produced no sensor value and no image.
    pub const DATA_VALIDATION_FAIL: &str = "DATA_VALIDATION_FAIL";
    /// A record was rejected by the store.
    pub const DATA_VALIDATION_ERROR: &str = "DATA_VALIDATION_ERROR";
    /// The endpoint answered with a non-success status.
    pub const SERVER_UPLOAD_ERROR: &str = "SERVER_UPLOAD_ERROR";
    /// The endpoint could not be reached.
    pub const SERVER_CONNECTION_ERROR: &str = "SERVER_CONNECTION_ERROR";
    /// A submit exceeded its deadline.
    pub const SERVER_TIMEOUT: &str = "SERVER_TIMEOUT";
    /// The weight channel has no usable calibration.
    pub const WEIGHT_UNCALIBRATED: &str = "WEIGHT_UNCALIBRATED";
    /// The calibration file exists but could not be read.
    pub const CALIBRATION_LOAD_ERROR: &str = "CALIBRATION_LOAD_ERROR";
    /// A calibration run was aborted.
    pub const CALIBRATION_FAILED: &str = "CALIBRATION_FAILED";
    /// The record store could not be used this cycle.
    pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";
}

/// One logged failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Error sink that only emits `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn record(&self, code: &str, message: &str) {
        warn!(code, "{}", message);
    }
}

/// Error sink backed by a JSON file.
#[derive(Debug)]
pub struct JsonErrorLog {
    path: PathBuf,
    max_entries: usize,
    guard: Mutex<()>,
}

impl JsonErrorLog {
    /// Default cap on stored entries; the oldest are dropped first.
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    /// Create a log at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            guard: Mutex::new(()),
        }
    }

    /// Override the entry cap.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, oldest first. A missing file is an empty log.
    pub fn entries(&self) -> Result<Vec<ErrorEntry>> {
        let _guard = self.lock();
        self.load()
    }

    /// Append an entry.
    pub fn append(&self, code: &str, message: &str) -> Result<()> {
        let _guard = self.lock();
        let mut entries = self.load_or_reset();
        entries.push(ErrorEntry {
            code: code.to_string(),
            message: message.to_string(),
            timestamp: OffsetDateTime::now_utc(),
        });
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }
        self.store(&entries)
    }

    /// Remove entries older than `retention`. Returns how many were removed.
    pub fn prune_older_than(&self, retention: Duration) -> Result<usize> {
        let Some(cutoff) = time::Duration::try_from(retention)
            .ok()
            .and_then(|retention| OffsetDateTime::now_utc().checked_sub(retention))
        else {
            return Ok(0);
        };
        let _guard = self.lock();
        let mut entries = self.load_or_reset();
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            self.store(&entries)?;
        }
        Ok(removed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn load(&self) -> Result<Vec<ErrorEntry>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// A corrupt log is replaced rather than blocking new entries.
    fn load_or_reset(&self) -> Vec<ErrorEntry> {
        self.load().unwrap_or_else(|e| {
            warn!("Discarding unreadable error log {}: {}", self.path.display(), e);
            Vec::new()
        })
    }

    fn store(&self, entries: &[ErrorEntry]) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.path, &json)?;
        Ok(())
    }

    #[cfg(test)]
    fn store_raw(&self, entries: &[ErrorEntry]) {
        self.store(entries).unwrap();
    }
}

impl ErrorSink for JsonErrorLog {
    fn record(&self, code: &str, message: &str) {
        warn!(code, "{}", message);
        if let Err(e) = self.append(code, message) {
            warn!("Failed to write error log {}: {}", self.path.display(), e);
        }
    }
}
