//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::{Date, OffsetDateTime};
use tracing::{debug, info};

use stationlog_types::{CollectionCycleResult, Reading, Source};

use crate::error::{Error, Result};
use crate::models::{
    DailyAggregate, DailyCollectionStats, SourceCount, StoreStats, StoredReading, UpsertOutcome,
};
use crate::queries::{ReadingQuery, lower_bound_secs};
use crate::schema;

/// SQLite-based store for station readings.
///
/// Readings are unique per `(minute, source)`: a second reading from the
/// same source within the same UTC minute is skipped, not merged.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        // WAL lets readers proceed while the collector writes
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn source_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Source> {
    let tag: String = row.get(idx)?;
    tag.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn stored_reading(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    Ok(StoredReading {
        id: row.get(0)?,
        timestamp: timestamp_at(row, 1)?,
        source: source_at(row, 2)?,
        temperature: row.get(3)?,
        humidity: row.get(4)?,
        pressure: row.get(5)?,
        wind_speed: row.get(6)?,
        wind_direction: row.get(7)?,
        uv_index: row.get(8)?,
        stored_at: timestamp_at(row, 9)?,
    })
}

/// `YYYY-MM-DD` for a UTC date.
fn day_key(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

// Reading operations
impl Store {
    /// Store a reading unless one for the same minute and source exists.
    ///
    /// The write is a single-row transaction: concurrent or repeated upserts
    /// of the same reading leave exactly one row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReading`] if the reading has no measurement or
    /// an out-of-range value.
    pub fn upsert(&self, reading: &Reading) -> Result<UpsertOutcome> {
        reading.validate()?;

        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "INSERT INTO readings (ts, minute, source, temperature, humidity, pressure,
             wind_speed, wind_direction, uv_index, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(minute, source) DO NOTHING",
            rusqlite::params![
                reading.timestamp.unix_timestamp(),
                reading.minute_bucket(),
                reading.source.as_str(),
                reading.temperature,
                reading.humidity,
                reading.pressure,
                reading.wind_speed,
                reading.wind_direction,
                reading.uv_index,
                OffsetDateTime::now_utc().unix_timestamp(),
            ],
        )?;

        let outcome = if changed == 1 {
            UpsertOutcome::Inserted {
                id: tx.last_insert_rowid(),
            }
        } else {
            UpsertOutcome::DuplicateSkipped
        };
        tx.commit()?;

        debug!(
            "Upsert {} reading at {}: {:?}",
            reading.source, reading.timestamp, outcome
        );
        Ok(outcome)
    }

    /// Readings with `from <= timestamp <= to`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `from` is after `to`.
    pub fn query_range(&self, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<StoredReading>> {
        if from > to {
            return Err(Error::InvalidRange(format!("{from} is after {to}")));
        }
        self.query_readings(&ReadingQuery::new().since(from).until(to).oldest_first())
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(params_ref.as_slice(), stored_reading)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Get the newest reading, optionally from one source.
    pub fn latest_reading(&self, source: Option<Source>) -> Result<Option<StoredReading>> {
        let mut query = ReadingQuery::new().limit(1);
        if let Some(source) = source {
            query = query.source(source);
        }
        let mut readings = self.query_readings(&query)?;
        Ok(readings.pop())
    }

    /// Count readings, optionally from one source.
    pub fn count_readings(&self, source: Option<Source>) -> Result<u64> {
        let count: i64 = match source {
            Some(source) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE source = ?",
                [source.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Delete readings taken before `cutoff`. Returns the number removed.
    pub fn prune_before(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM readings WHERE ts < ?",
            [lower_bound_secs(cutoff)],
        )?;
        if removed > 0 {
            info!("Pruned {} readings older than {}", removed, cutoff);
        }
        Ok(removed)
    }
}

// Statistics
impl Store {
    /// Totals, time span and per-source counts.
    pub fn stats(&self) -> Result<StoreStats> {
        let (total, first, last): (i64, Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), MIN(ts), MAX(ts) FROM readings",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let to_time = |secs: Option<i64>| -> Result<Option<OffsetDateTime>> {
            secs.map(|s| {
                OffsetDateTime::from_unix_timestamp(s).map_err(|e| {
                    Error::Database(rusqlite::Error::FromSqlConversionFailure(
                        0,
                        Type::Integer,
                        Box::new(e),
                    ))
                })
            })
            .transpose()
        };

        let mut per_source = Vec::new();
        for source in Source::ALL {
            let count = self.count_readings(Some(source))?;
            if count > 0 {
                per_source.push(SourceCount { source, count });
            }
        }

        Ok(StoreStats {
            total_readings: total as u64,
            first_timestamp: to_time(first)?,
            last_timestamp: to_time(last)?,
            per_source,
        })
    }

    /// Per-UTC-day aggregates over `[from, to]`, oldest day first.
    pub fn daily_aggregates(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<DailyAggregate>> {
        if from > to {
            return Err(Error::InvalidRange(format!("{from} is after {to}")));
        }

        let mut stmt = self.conn.prepare(
            "SELECT date(ts, 'unixepoch') AS day, COUNT(*),
                    AVG(temperature), MIN(temperature), MAX(temperature),
                    AVG(humidity), AVG(pressure),
                    AVG(wind_speed), MAX(wind_speed), MAX(uv_index)
             FROM readings
             WHERE ts >= ?1 AND ts <= ?2
             GROUP BY day
             ORDER BY day ASC",
        )?;

        let days = stmt
            .query_map(
                rusqlite::params![lower_bound_secs(from), to.unix_timestamp()],
                |row| {
                    Ok(DailyAggregate {
                        day: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                        avg_temperature: row.get(2)?,
                        min_temperature: row.get(3)?,
                        max_temperature: row.get(4)?,
                        avg_humidity: row.get(5)?,
                        avg_pressure: row.get(6)?,
                        avg_wind_speed: row.get(7)?,
                        max_wind_speed: row.get(8)?,
                        max_uv_index: row.get(9)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(days)
    }
}

// Collection counters
impl Store {
    /// Fold one cycle outcome into its day's counters.
    pub fn record_cycle(&self, result: &CollectionCycleResult) -> Result<()> {
        let day = day_key(result.attempted_at.date());
        let success = i64::from(result.succeeded);
        let failure = i64::from(!result.succeeded);
        let duplicate = i64::from(result.succeeded && result.duplicate);
        let fallback = i64::from(
            result.succeeded
                && result
                    .source_used
                    .is_some_and(|s| s != Source::PrimaryDevice),
        );
        let last_error = if result.succeeded {
            None
        } else {
            result.error_message.clone()
        };

        self.conn.execute(
            "INSERT INTO daily_collection_stats (day, successes, failures, duplicates, fallbacks,
             last_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(day) DO UPDATE SET
                successes = successes + ?2,
                failures = failures + ?3,
                duplicates = duplicates + ?4,
                fallbacks = fallbacks + ?5,
                last_error = COALESCE(?6, last_error),
                updated_at = ?7",
            rusqlite::params![
                day,
                success,
                failure,
                duplicate,
                fallback,
                last_error,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )?;

        Ok(())
    }

    /// Counters for one UTC day, if any cycle ran that day.
    pub fn collection_stats(&self, date: Date) -> Result<Option<DailyCollectionStats>> {
        let stats = self
            .conn
            .query_row(
                "SELECT day, successes, failures, duplicates, fallbacks, last_error
                 FROM daily_collection_stats WHERE day = ?",
                [day_key(date)],
                daily_collection_stats,
            )
            .optional()?;
        Ok(stats)
    }

    /// Counters for the most recent `days` days that have any, newest first.
    pub fn recent_collection_stats(&self, days: u32) -> Result<Vec<DailyCollectionStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT day, successes, failures, duplicates, fallbacks, last_error
             FROM daily_collection_stats ORDER BY day DESC LIMIT ?",
        )?;
        let stats = stmt
            .query_map([days], daily_collection_stats)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stats)
    }
}

fn daily_collection_stats(row: &Row<'_>) -> rusqlite::Result<DailyCollectionStats> {
    Ok(DailyCollectionStats {
        day: row.get(0)?,
        successes: row.get::<_, i64>(1)? as u64,
        failures: row.get::<_, i64>(2)? as u64,
        duplicates: row.get::<_, i64>(3)? as u64,
        fallbacks: row.get::<_, i64>(4)? as u64,
        last_error: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationlog_types::ErrorKind;
    use time::macros::datetime;

    fn reading(at: OffsetDateTime, source: Source, temperature: f64) -> Reading {
        Reading::builder(at, source)
            .temperature(temperature)
            .humidity(60.0)
            .build()
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_readings(None).unwrap(), 0);
        assert!(store.latest_reading(None).unwrap().is_none());
    }

    #[test]
    fn test_upsert_and_read_back() {
        let store = Store::open_in_memory().unwrap();
        let at = datetime!(2025-07-24 10:15:30 UTC);
        let original = Reading::builder(at, Source::PrimaryDevice)
            .temperature(18.7)
            .humidity(63.0)
            .pressure(1013.25)
            .wind_speed(3.4)
            .wind_direction(270.0)
            .uv_index(5.2)
            .build();

        let outcome = store.upsert(&original).unwrap();
        assert!(outcome.is_inserted());

        let stored = store.latest_reading(None).unwrap().unwrap();
        assert_eq!(stored.to_reading(), original);
        assert!(matches!(outcome, UpsertOutcome::Inserted { id } if id == stored.id));
    }

    #[test]
    fn test_same_minute_is_duplicate() {
        let store = Store::open_in_memory().unwrap();
        let first = reading(datetime!(2025-07-24 10:15:05 UTC), Source::PrimaryDevice, 18.0);
        let jittered = reading(datetime!(2025-07-24 10:15:55 UTC), Source::PrimaryDevice, 19.0);

        assert!(store.upsert(&first).unwrap().is_inserted());
        assert_eq!(store.upsert(&jittered).unwrap(), UpsertOutcome::DuplicateSkipped);
        assert_eq!(store.upsert(&first).unwrap(), UpsertOutcome::DuplicateSkipped);

        assert_eq!(store.count_readings(None).unwrap(), 1);
        // the first write wins
        let stored = store.latest_reading(None).unwrap().unwrap();
        assert_eq!(stored.temperature, Some(18.0));
    }

    #[test]
    fn test_same_minute_other_source_is_kept() {
        let store = Store::open_in_memory().unwrap();
        let at = datetime!(2025-07-24 10:15:00 UTC);
        store.upsert(&reading(at, Source::PrimaryDevice, 18.0)).unwrap();
        store
            .upsert(&reading(at, Source::SecondaryClimate, 17.5))
            .unwrap();

        assert_eq!(store.count_readings(None).unwrap(), 2);
        assert_eq!(store.count_readings(Some(Source::SecondaryClimate)).unwrap(), 1);
    }

    #[test]
    fn test_invalid_reading_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let empty = Reading::new(datetime!(2025-07-24 10:15:00 UTC), Source::PrimaryDevice);
        assert!(matches!(store.upsert(&empty), Err(Error::InvalidReading(_))));
        assert_eq!(store.count_readings(None).unwrap(), 0);
    }

    #[test]
    fn test_query_range_is_inclusive_and_ascending() {
        let store = Store::open_in_memory().unwrap();
        let base = datetime!(2025-07-24 10:00 UTC);
        for minutes in [30_i64, 0, 10, 20, 40] {
            let at = base + time::Duration::minutes(minutes);
            store.upsert(&reading(at, Source::PrimaryDevice, 20.0)).unwrap();
        }

        let from = base + time::Duration::minutes(10);
        let to = base + time::Duration::minutes(30);
        let rows = store.query_range(from, to).unwrap();

        let stamps: Vec<_> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(
            stamps,
            vec![
                from,
                base + time::Duration::minutes(20),
                to,
            ]
        );
    }

    #[test]
    fn test_query_range_sub_second_from_excludes_earlier_reading() {
        let store = Store::open_in_memory().unwrap();
        let at = datetime!(2025-07-24 10:15:00.200 UTC);
        store.upsert(&reading(at, Source::PrimaryDevice, 20.0)).unwrap();

        let from = datetime!(2025-07-24 10:15:00.500 UTC);
        let to = datetime!(2025-07-24 10:20:00 UTC);
        let rows = store.query_range(from, to).unwrap();
        assert!(rows.iter().all(|r| r.timestamp >= from && r.timestamp <= to));
        assert!(rows.is_empty());

        let rows = store
            .query_range(datetime!(2025-07-24 10:15:00 UTC), to)
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_query_range_rejects_inverted_bounds() {
        let store = Store::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();
        assert!(matches!(
            store.query_range(now, now - time::Duration::hours(1)),
            Err(Error::InvalidRange(_))
        ));
    }

    #[test]
    fn test_prune_before() {
        let store = Store::open_in_memory().unwrap();
        let old = datetime!(2024-01-01 00:00 UTC);
        let recent = datetime!(2025-07-24 00:00 UTC);
        store.upsert(&reading(old, Source::PrimaryDevice, 1.0)).unwrap();
        store.upsert(&reading(recent, Source::PrimaryDevice, 2.0)).unwrap();

        let removed = store.prune_before(datetime!(2025-01-01 00:00 UTC)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_readings(None).unwrap(), 1);
    }

    #[test]
    fn test_stats() {
        let store = Store::open_in_memory().unwrap();
        let first = datetime!(2025-07-24 08:00 UTC);
        let last = datetime!(2025-07-24 09:00 UTC);
        store.upsert(&reading(first, Source::PrimaryDevice, 15.0)).unwrap();
        store.upsert(&reading(last, Source::SecondaryClimate, 16.0)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_readings, 2);
        assert_eq!(stats.first_timestamp, Some(first));
        assert_eq!(stats.last_timestamp, Some(last));
        assert_eq!(
            stats.per_source,
            vec![
                SourceCount {
                    source: Source::PrimaryDevice,
                    count: 1
                },
                SourceCount {
                    source: Source::SecondaryClimate,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_daily_aggregates() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert(&reading(datetime!(2025-07-23 12:00 UTC), Source::PrimaryDevice, 10.0))
            .unwrap();
        store
            .upsert(&reading(datetime!(2025-07-24 06:00 UTC), Source::PrimaryDevice, 12.0))
            .unwrap();
        store
            .upsert(&reading(datetime!(2025-07-24 14:00 UTC), Source::PrimaryDevice, 20.0))
            .unwrap();

        let days = store
            .daily_aggregates(datetime!(2025-07-23 00:00 UTC), datetime!(2025-07-24 23:59 UTC))
            .unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].day, "2025-07-23");
        assert_eq!(days[1].day, "2025-07-24");
        assert_eq!(days[1].count, 2);
        assert_eq!(days[1].avg_temperature, Some(16.0));
        assert_eq!(days[1].min_temperature, Some(12.0));
        assert_eq!(days[1].max_temperature, Some(20.0));
        assert_eq!(days[1].max_uv_index, None);
    }

    #[test]
    fn test_record_cycle_counters() {
        let store = Store::open_in_memory().unwrap();
        let at = datetime!(2025-07-24 10:00 UTC);

        store
            .record_cycle(&CollectionCycleResult::success(at, Source::PrimaryDevice, 1, false))
            .unwrap();
        store
            .record_cycle(&CollectionCycleResult::success(at, Source::SecondaryClimate, 2, true))
            .unwrap();
        store
            .record_cycle(&CollectionCycleResult::failure(
                at,
                ErrorKind::Aggregate,
                "All sources failed",
                3,
            ))
            .unwrap();

        let stats = store.collection_stats(at.date()).unwrap().unwrap();
        assert_eq!(stats.day, "2025-07-24");
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.last_error.as_deref(), Some("All sources failed"));

        assert!(store.collection_stats(datetime!(2025-07-25 00:00 UTC).date()).unwrap().is_none());
        assert_eq!(store.recent_collection_stats(7).unwrap().len(), 1);
    }
}
