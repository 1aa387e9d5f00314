//! Secondary climate source.
//!
//! A coordinate-keyed public weather service (Open-Meteo compatible) used
//! when the station itself cannot be read. Requests are unsigned; values are
//! requested in the station's units (°C, %, hPa, m/s, degrees).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use stationlog_types::{Reading, Source};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metrics::{ClientMetrics, Operation};
use crate::source::ReadingSource;

/// Default service base URL.
pub const DEFAULT_CLIMATE_BASE_URL: &str = "https://api.open-meteo.com";

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,surface_pressure,wind_speed_10m,wind_direction_10m,uv_index";

/// Options for [`ClimateClient`].
#[derive(Debug, Clone)]
pub struct ClimateOptions {
    /// Service base URL.
    pub base_url: String,
    /// Station latitude.
    pub latitude: f64,
    /// Station longitude.
    pub longitude: f64,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

impl ClimateOptions {
    /// Options for the public service at the given coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            base_url: DEFAULT_CLIMATE_BASE_URL.to_string(),
            latitude,
            longitude,
            request_timeout: crate::transport::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<CurrentConditions>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    /// Unix seconds (requested with `timeformat=unixtime`).
    time: i64,
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    surface_pressure: Option<f64>,
    wind_speed_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
    uv_index: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    reason: Option<String>,
}

/// Client for the secondary climate service.
#[derive(Debug)]
pub struct ClimateClient {
    http: Client,
    options: ClimateOptions,
    metrics: Arc<ClientMetrics>,
}

impl ClimateClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for out-of-range coordinates or a
    /// malformed base URL.
    pub fn new(mut options: ClimateOptions, metrics: Arc<ClientMetrics>) -> Result<Self> {
        if !(-90.0..=90.0).contains(&options.latitude) {
            return Err(Error::InvalidConfig(format!(
                "latitude {} is outside -90..90",
                options.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&options.longitude) {
            return Err(Error::InvalidConfig(format!(
                "longitude {} is outside -180..180",
                options.longitude
            )));
        }
        options.base_url = options.base_url.trim_end_matches('/').to_string();
        if !options.base_url.starts_with("http://") && !options.base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "climate base URL must start with http:// or https://, got: {}",
                options.base_url
            )));
        }

        let http = Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!("stationlog/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            options,
            metrics,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/forecast?latitude={}&longitude={}&current={}&wind_speed_unit=ms&timeformat=unixtime",
            self.options.base_url, self.options.latitude, self.options.longitude, CURRENT_FIELDS
        )
    }

    /// Fetch current conditions at the configured coordinates.
    pub async fn fetch_current(&self) -> Result<Reading> {
        let started = Instant::now();
        let result = self.fetch_inner().await;
        self.metrics
            .record(Operation::Climate, result.is_ok(), started.elapsed());
        result
    }

    async fn fetch_inner(&self) -> Result<Reading> {
        let op = Operation::Climate.as_str();
        let url = self.url();
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::transport(op, &e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(Error::RateLimit {
                retry_after,
                message: "climate service rate limit".to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(op, &e))?;

        if status == StatusCode::BAD_REQUEST {
            let reason = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.reason)
                .unwrap_or_else(|| "bad request".to_string());
            return Err(Error::Protocol(format!("climate service rejected request: {reason}")));
        }
        if !status.is_success() {
            return Err(Error::Transport {
                operation: op.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        parse_current(&body)
    }
}

fn parse_current(body: &str) -> Result<Reading> {
    let response: ForecastResponse = serde_json::from_str(body)
        .map_err(|e| Error::Protocol(format!("climate response is not valid: {e}")))?;
    let current = response
        .current
        .ok_or_else(|| Error::Protocol("climate response has no current block".to_string()))?;

    let timestamp = OffsetDateTime::from_unix_timestamp(current.time)
        .map_err(|e| Error::Protocol(format!("climate time out of range: {e}")))?;

    let reading = Reading {
        timestamp,
        source: Source::SecondaryClimate,
        temperature: current.temperature_2m,
        humidity: current.relative_humidity_2m,
        pressure: current.surface_pressure,
        wind_speed: current.wind_speed_10m,
        wind_direction: current.wind_direction_10m,
        uv_index: current.uv_index,
    };
    reading
        .validate()
        .map_err(|e| Error::Protocol(format!("climate reading rejected: {e}")))?;
    Ok(reading)
}

#[async_trait]
impl ReadingSource for ClimateClient {
    fn source(&self) -> Source {
        Source::SecondaryClimate
    }

    async fn fetch(&self) -> Result<Reading> {
        self.fetch_current().await
    }
}
