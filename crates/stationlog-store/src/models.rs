//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use stationlog_types::{Reading, Source};

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// When the reading was taken, whole seconds.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Where the reading came from.
    pub source: Source,
    /// Air temperature in °C.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Pressure in hPa.
    pub pressure: Option<f64>,
    /// Wind speed in m/s.
    pub wind_speed: Option<f64>,
    /// Wind direction in degrees.
    pub wind_direction: Option<f64>,
    /// UV index.
    pub uv_index: Option<f64>,
    /// When the row was written.
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
}

impl StoredReading {
    /// Convert back to a [`Reading`].
    pub fn to_reading(&self) -> Reading {
        Reading {
            timestamp: self.timestamp,
            source: self.source,
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            wind_speed: self.wind_speed,
            wind_direction: self.wind_direction,
            uv_index: self.uv_index,
        }
    }
}

/// Result of [`Store::upsert`](crate::Store::upsert).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum UpsertOutcome {
    /// A new row was written.
    Inserted {
        /// Row ID of the new reading.
        id: i64,
    },
    /// A reading for the same minute and source already existed.
    DuplicateSkipped,
}

impl UpsertOutcome {
    /// Whether a row was written.
    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted { .. })
    }
}

/// Row count for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    /// The source.
    pub source: Source,
    /// Number of stored readings.
    pub count: u64,
}

/// Summary of the readings table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Total stored readings.
    pub total_readings: u64,
    /// Oldest reading.
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_timestamp: Option<OffsetDateTime>,
    /// Newest reading.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_timestamp: Option<OffsetDateTime>,
    /// Counts per source, in source order.
    pub per_source: Vec<SourceCount>,
}

/// Per-UTC-day aggregate of stored readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    /// UTC date, `YYYY-MM-DD`.
    pub day: String,
    /// Readings that day.
    pub count: u64,
    /// Mean temperature.
    pub avg_temperature: Option<f64>,
    /// Lowest temperature.
    pub min_temperature: Option<f64>,
    /// Highest temperature.
    pub max_temperature: Option<f64>,
    /// Mean humidity.
    pub avg_humidity: Option<f64>,
    /// Mean pressure.
    pub avg_pressure: Option<f64>,
    /// Mean wind speed.
    pub avg_wind_speed: Option<f64>,
    /// Strongest wind speed.
    pub max_wind_speed: Option<f64>,
    /// Highest UV index.
    pub max_uv_index: Option<f64>,
}

/// Collection counters for one UTC day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCollectionStats {
    /// UTC date, `YYYY-MM-DD`.
    pub day: String,
    /// Cycles that produced a reading.
    pub successes: u64,
    /// Cycles that produced nothing.
    pub failures: u64,
    /// Successful cycles whose reading was already stored.
    pub duplicates: u64,
    /// Successful cycles served by a non-primary source.
    pub fallbacks: u64,
    /// Message of the latest failure that day.
    pub last_error: Option<String>,
}
