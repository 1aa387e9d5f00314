//! Error types for stationlog-store.

use std::path::PathBuf;

use stationlog_types::ParseError;

/// Result type for stationlog-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stationlog-store.
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

    /// The reading failed validation and was not written.
    #[error("Invalid reading: {0}")]
    InvalidReading(#[from] ParseError),

    /// Invalid query range.
    #[error("Invalid range: {0}")]
    InvalidRange(String),
}
