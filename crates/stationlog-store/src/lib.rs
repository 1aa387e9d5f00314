//! Local persistence for weather station readings.
//!
//! This crate provides SQLite-based storage for normalized readings with
//! per-minute deduplication, plus the daily counters the collector keeps.
//!
//! # Features
//!
//! - Idempotent upserts keyed on `(minute, source)`
//! - Inclusive, ascending range reads for downstream analysis
//! - Query by source and time range, with pagination
//! - Summary statistics and per-day aggregates
//! - Retention pruning
//!
//! # Example
//!
//! ```no_run
//! use stationlog_store::{Store, ReadingQuery};
//! use stationlog_types::Source;
//!
//! let store = Store::open_default()?;
//!
//! let query = ReadingQuery::new()
//!     .source(Source::PrimaryDevice)
//!     .limit(10);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), stationlog_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{
    DailyAggregate, DailyCollectionStats, SourceCount, StoreStats, StoredReading, UpsertOutcome,
};
pub use queries::ReadingQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/stationlog/weather.db`
/// - macOS: `~/Library/Application Support/stationlog/weather.db`
/// - Windows: `C:\Users\<user>\AppData\Local\stationlog\weather.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("stationlog")
        .join("weather.db")
}
