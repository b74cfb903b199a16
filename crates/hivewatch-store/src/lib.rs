//! Durable local buffer of sensor records.
//!
//! This crate provides the SQLite-backed record store the collector writes
//! to and the sync engine drains. Every record carries a `synced` flag, so
//! readings captured while the uplink is down are kept and delivered later.
//!
//! # Features
//!
//! - Append-only records with strictly increasing ids
//! - Unsynced backlog in insertion order
//! - Idempotent delivery marking
//! - Retention pruning regardless of sync state
//! - Filtered, paginated queries
//!
//! # Example
//!
//! ```
//! use hivewatch_store::{NewRecord, Store};
//! use hivewatch_types::{Channel, Readings};
//!
//! let store = Store::open_in_memory()?;
//! let id = store.insert(&NewRecord::new(Readings::new().with(Channel::Weight, 41_250.0)))?;
//!
//! for record in store.fetch_unsynced()? {
//!     // ... deliver ...
//!     store.mark_synced(record.id)?;
//! }
//! assert!(store.get(id)?.unwrap().synced);
//! # Ok::<(), hivewatch_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{NewRecord, SensorRecord, StoreStats};
pub use queries::RecordQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/hivewatch/records.db`
/// - macOS: `~/Library/Application Support/hivewatch/records.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("hivewatch")
        .join("records.db")
}
