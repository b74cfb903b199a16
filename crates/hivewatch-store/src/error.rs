//! Error types for hivewatch-store.

use std::path::PathBuf;

/// Result type for hivewatch-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hivewatch-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The record failed validation and was not written.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}
