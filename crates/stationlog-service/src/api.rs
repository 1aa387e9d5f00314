//! Read-only REST API over the store and the collector.
//!
//! # Lock Acquisition
//!
//! - **`state.store`** (Mutex): held only for the duration of a query.
//! - **`state.collector`** history (RwLock): read briefly to clone results.
//!
//! No handler holds both at once.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Store errors
//! return HTTP 500, except invalid ranges which are the caller's fault (400).
//!
//! # Example
//!
//! ```ignore
//! use stationlog_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use stationlog_core::ClientMetricsSnapshot;
use stationlog_store::{
    DailyAggregate, DailyCollectionStats, ReadingQuery, StoreStats, StoredReading,
};
use stationlog_types::{CollectionCycleResult, Source};

use crate::state::{AppState, CollectorPhase, CollectorStats};

/// Results included in `/api/status`.
const STATUS_RECENT_RESULTS: usize = 10;
/// Default window for `/api/stats/daily`.
const DEFAULT_DAILY_WINDOW_DAYS: i64 = 7;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/readings", get(get_readings))
        .route("/api/readings/latest", get(get_latest_reading))
        .route("/api/stats", get(get_stats))
        .route("/api/stats/daily", get(get_daily_stats))
        .route("/metrics", get(prometheus_metrics))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service version.
    pub version: &'static str,
    /// Current timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Collector phase and counters.
    pub collector: CollectorStats,
    /// Uptime of the tick loop in seconds.
    pub uptime_seconds: Option<u64>,
    /// Upstream request metrics.
    pub requests: ClientMetricsSnapshot,
    /// Today's persisted collection counters.
    pub today: Option<DailyCollectionStats>,
    /// Latest cycle results, newest first.
    pub recent: Vec<CollectionCycleResult>,
}

/// Get service status including collector state and request metrics.
async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let now = OffsetDateTime::now_utc();
    let collector = state.collector.stats().await;
    let uptime_seconds = collector
        .started_at
        .filter(|_| collector.running)
        .map(|s| (now - s).whole_seconds().max(0) as u64);
    let recent = state.collector.recent_results(STATUS_RECENT_RESULTS).await;

    let today = {
        let store = state.store.lock().await;
        store.collection_stats(now.date())?
    };

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        collector,
        uptime_seconds,
        requests: state.client_metrics.snapshot(),
        today,
        recent,
    }))
}

/// Query parameters for readings.
#[derive(Debug, Deserialize, Default)]
pub struct ReadingsQuery {
    /// Unix seconds, inclusive.
    pub since: Option<i64>,
    /// Unix seconds, inclusive.
    pub until: Option<i64>,
    /// `primary_device`, `secondary_climate` or `manual_import`.
    pub source: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// `asc` or `desc` (default).
    pub order: Option<String>,
}

impl ReadingsQuery {
    /// Validate the parameters and build a store query.
    pub fn to_query(&self) -> Result<ReadingQuery, AppError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }

        let mut query = ReadingQuery::new();
        if let Some(source) = parse_source(self.source.as_deref())? {
            query = query.source(source);
        }
        if let Some(since) = self.since {
            query = query.since(unix_time("since", since)?);
        }
        if let Some(until) = self.until {
            query = query.until(unix_time("until", until)?);
        }
        match self.order.as_deref() {
            None | Some("desc") => {}
            Some("asc") => query = query.oldest_first(),
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "Invalid order '{}': expected 'asc' or 'desc'",
                    other
                )));
            }
        }
        // One extra row tells us whether there are more.
        if let Some(limit) = self.limit {
            query = query.limit(limit.saturating_add(1));
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }

        Ok(query)
    }
}

fn parse_source(value: Option<&str>) -> Result<Option<Source>, AppError> {
    value
        .map(|s| {
            Source::from_str(s).map_err(|_| {
                AppError::BadRequest(format!(
                    "Unknown source '{}': expected one of primary_device, secondary_climate, manual_import",
                    s
                ))
            })
        })
        .transpose()
}

fn unix_time(name: &str, value: i64) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::from_unix_timestamp(value)
        .map_err(|_| AppError::BadRequest(format!("'{}' ({}) is out of range", name, value)))
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    /// The data items.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    /// Number of items returned.
    pub count: usize,
    /// Offset from the beginning.
    pub offset: u32,
    /// Maximum items requested (if specified).
    pub limit: Option<u32>,
    /// Whether there are more items available.
    pub has_more: bool,
}

/// Get stored readings.
///
/// # Query Parameters
///
/// - `since`, `until`: Unix timestamps, inclusive
/// - `source`: restrict to one source
/// - `limit`, `offset`: pagination
/// - `order`: `asc` or `desc` (default, newest first)
///
/// # Errors
///
/// - Returns [`AppError::BadRequest`] for invalid parameters
/// - Returns [`AppError::Store`] if the database query fails
async fn get_readings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<PaginatedResponse<StoredReading>>, AppError> {
    let query = params.to_query()?;

    let mut readings = {
        let store = state.store.lock().await;
        store.query_readings(&query)?
    };

    let has_more = params.limit.is_some_and(|l| readings.len() > l as usize);
    if has_more {
        readings.pop();
    }

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: readings.len(),
            offset: params.offset.unwrap_or(0),
            limit: params.limit,
            has_more,
        },
        data: readings,
    }))
}

/// Query parameters for the latest reading.
#[derive(Debug, Deserialize, Default)]
pub struct LatestQuery {
    pub source: Option<String>,
}

/// Get the newest stored reading, optionally for one source.
async fn get_latest_reading(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LatestQuery>,
) -> Result<Json<StoredReading>, AppError> {
    let source = parse_source(params.source.as_deref())?;
    let store = state.store.lock().await;
    let reading = store
        .latest_reading(source)?
        .ok_or_else(|| AppError::NotFound("No readings stored yet".to_string()))?;
    Ok(Json(reading))
}

/// Get store statistics.
async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StoreStats>, AppError> {
    let store = state.store.lock().await;
    Ok(Json(store.stats()?))
}

/// Query parameters for daily statistics.
#[derive(Debug, Deserialize, Default)]
pub struct DailyQuery {
    /// Unix seconds, inclusive. Defaults to seven days before `until`.
    pub since: Option<i64>,
    /// Unix seconds, inclusive. Defaults to now.
    pub until: Option<i64>,
}

/// Daily statistics response.
#[derive(Debug, Serialize)]
pub struct DailyStatsResponse {
    /// Per-day reading aggregates, oldest first.
    pub readings: Vec<DailyAggregate>,
    /// Per-day collection counters, oldest first.
    pub collection: Vec<DailyCollectionStats>,
}

/// Get per-day aggregates and collection counters.
async fn get_daily_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DailyQuery>,
) -> Result<Json<DailyStatsResponse>, AppError> {
    let until = match params.until {
        Some(ts) => unix_time("until", ts)?,
        None => OffsetDateTime::now_utc(),
    };
    let since = match params.since {
        Some(ts) => unix_time("since", ts)?,
        None => until - time::Duration::days(DEFAULT_DAILY_WINDOW_DAYS),
    };
    if since > until {
        return Err(AppError::BadRequest(format!(
            "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
            since.unix_timestamp(),
            until.unix_timestamp()
        )));
    }

    let days = (until.date() - since.date()).whole_days() + 1;
    let store = state.store.lock().await;
    let readings = store.daily_aggregates(since, until)?;
    let (first, last) = (day_key(since), day_key(until));
    let mut collection: Vec<DailyCollectionStats> = store
        .recent_collection_stats(u32::try_from(days).unwrap_or(u32::MAX))?
        .into_iter()
        .filter(|d| d.day >= first && d.day <= last)
        .collect();
    collection.reverse();

    Ok(Json(DailyStatsResponse {
        readings,
        collection,
    }))
}

fn day_key(at: OffsetDateTime) -> String {
    let date = at.date();
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Content type for Prometheus metrics.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metrics endpoint.
///
/// # Metrics Exported
///
/// ## Collector
/// - `stationlog_collector_running` - Whether the tick loop is running
/// - `stationlog_collector_uptime_seconds` - Tick loop uptime
/// - `stationlog_collector_phase` - Current phase (one series per phase)
/// - `stationlog_cycles_total` - Finished cycles by outcome
/// - `stationlog_dropped_ticks_total` - Ticks skipped while a cycle was in flight
/// - `stationlog_duplicate_readings_total` - Cycles whose reading was already stored
/// - `stationlog_source_readings_total` - Successful cycles per source
///
/// ## Upstream requests
/// - `stationlog_requests_total` - Requests by operation and outcome
/// - `stationlog_request_duration_ms_avg` - Mean request latency by operation
/// - `stationlog_clock_drift_flags_total` - Readings keyed on request time
///
/// ## Readings (latest per source)
/// - `stationlog_temperature_celsius`, `stationlog_humidity_percent`,
///   `stationlog_pressure_hpa`, `stationlog_wind_speed_mps`,
///   `stationlog_wind_direction_degrees`, `stationlog_uv_index`,
///   `stationlog_reading_age_seconds`
/// - `stationlog_readings_stored` - Rows in the store
async fn prometheus_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let now = OffsetDateTime::now_utc();
    let collector = state.collector.stats().await;
    let requests = state.client_metrics.snapshot();

    // Clone what we need, then release the lock
    let (stored, latest) = {
        let store = state.store.lock().await;
        let stored = store.count_readings(None)?;
        let mut latest = Vec::new();
        for source in Source::ALL {
            if let Some(reading) = store.latest_reading(Some(source))? {
                latest.push(reading);
            }
        }
        (stored, latest)
    };

    let mut out = String::with_capacity(4096);
    out.push_str("# Weather station collector metrics\n\n");

    gauge(
        &mut out,
        "stationlog_collector_running",
        "Whether the collector is running (1=running, 0=stopped)",
        &[("", u64::from(collector.running) as f64)],
    );
    if collector.running
        && let Some(started) = collector.started_at
    {
        gauge(
            &mut out,
            "stationlog_collector_uptime_seconds",
            "How long the collector has been running",
            &[("", (now - started).whole_seconds().max(0) as f64)],
        );
    }

    let phases = [
        CollectorPhase::Idle,
        CollectorPhase::Collecting,
        CollectorPhase::Succeeded,
        CollectorPhase::Failed,
    ];
    let phase_labels: Vec<(String, f64)> = phases
        .iter()
        .map(|p| {
            (
                format!("phase=\"{}\"", p.as_str()),
                u64::from(*p == collector.phase) as f64,
            )
        })
        .collect();
    series(
        &mut out,
        "stationlog_collector_phase",
        "gauge",
        "Current collector phase (1 for the active phase)",
        &phase_labels,
    );

    series(
        &mut out,
        "stationlog_cycles_total",
        "counter",
        "Finished collection cycles by outcome",
        &[
            ("outcome=\"succeeded\"".to_string(), collector.succeeded as f64),
            ("outcome=\"failed\"".to_string(), collector.failed as f64),
        ],
    );
    counter(
        &mut out,
        "stationlog_dropped_ticks_total",
        "Ticks skipped because a cycle was still in flight",
        collector.dropped_ticks,
    );
    counter(
        &mut out,
        "stationlog_duplicate_readings_total",
        "Successful cycles whose reading was already stored",
        collector.duplicates,
    );
    let per_source: Vec<(String, f64)> = collector
        .per_source
        .iter()
        .map(|c| (format!("source=\"{}\"", c.source), c.count as f64))
        .collect();
    series(
        &mut out,
        "stationlog_source_readings_total",
        "counter",
        "Successful cycles per source",
        &per_source,
    );

    let mut request_totals = Vec::new();
    let mut request_latency = Vec::new();
    for (operation, metrics) in requests.operations() {
        request_totals.push((
            format!("operation=\"{}\",outcome=\"success\"", operation),
            metrics.success_count as f64,
        ));
        request_totals.push((
            format!("operation=\"{}\",outcome=\"failure\"", operation),
            metrics.failure_count as f64,
        ));
        if let Some(avg) = metrics.avg_duration_ms {
            request_latency.push((format!("operation=\"{}\"", operation), avg));
        }
    }
    series(
        &mut out,
        "stationlog_requests_total",
        "counter",
        "Upstream requests by operation and outcome",
        &request_totals,
    );
    if !request_latency.is_empty() {
        series(
            &mut out,
            "stationlog_request_duration_ms_avg",
            "gauge",
            "Mean upstream request latency in milliseconds",
            &request_latency,
        );
    }
    counter(
        &mut out,
        "stationlog_clock_drift_flags_total",
        "Readings keyed on request time because the device clock disagreed",
        requests.clock_drift_flags,
    );

    gauge(
        &mut out,
        "stationlog_readings_stored",
        "Readings in the store",
        &[("", stored as f64)],
    );

    if !latest.is_empty() {
        type Field = fn(&StoredReading) -> Option<f64>;
        let fields: [(&str, &str, Field); 6] = [
            ("stationlog_temperature_celsius", "Air temperature in degrees Celsius", |r| r.temperature),
            ("stationlog_humidity_percent", "Relative humidity percentage", |r| r.humidity),
            ("stationlog_pressure_hpa", "Atmospheric pressure in hectopascals", |r| r.pressure),
            ("stationlog_wind_speed_mps", "Wind speed in metres per second", |r| r.wind_speed),
            ("stationlog_wind_direction_degrees", "Wind direction in degrees", |r| r.wind_direction),
            ("stationlog_uv_index", "UV index", |r| r.uv_index),
        ];
        for (name, help, field) in fields {
            let values: Vec<(String, f64)> = latest
                .iter()
                .filter_map(|r| field(r).map(|v| (format!("source=\"{}\"", r.source), v)))
                .collect();
            if !values.is_empty() {
                series(&mut out, name, "gauge", help, &values);
            }
        }

        let ages: Vec<(String, f64)> = latest
            .iter()
            .map(|r| {
                (
                    format!("source=\"{}\"", r.source),
                    (now - r.timestamp).whole_seconds().max(0) as f64,
                )
            })
            .collect();
        series(
            &mut out,
            "stationlog_reading_age_seconds",
            "gauge",
            "Age of the latest reading in seconds",
            &ages,
        );
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        out,
    ))
}

fn series(out: &mut String, name: &str, kind: &str, help: &str, values: &[(String, f64)]) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
    for (labels, value) in values {
        if labels.is_empty() {
            let _ = writeln!(out, "{} {}", name, value);
        } else {
            let _ = writeln!(out, "{}{{{}}} {}", name, labels, value);
        }
    }
    out.push('\n');
}

fn gauge(out: &mut String, name: &str, help: &str, values: &[(&str, f64)]) {
    let values: Vec<(String, f64)> = values
        .iter()
        .map(|(labels, v)| (labels.to_string(), *v))
        .collect();
    series(out, name, "gauge", help, &values);
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    series(out, name, "counter", help, &[(String::new(), value as f64)]);
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(stationlog_store::Error),
}

impl From<stationlog_store::Error> for AppError {
    fn from(e: stationlog_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e @ stationlog_store::Error::InvalidRange(_)) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
