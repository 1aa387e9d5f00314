//! Cloud client library for a Tuya-connected weather station.
//!
//! This crate talks to the IoT platform's OpenAPI on behalf of a single
//! station: it signs requests, keeps an access token fresh, fetches and
//! normalizes device status, and falls back to a public climate service when
//! the station cannot be read.
//!
//! # Features
//!
//! - **Request signing**: HMAC-SHA256 over the canonical request, see [`sign`]
//! - **Token caching**: One exchange per expiry window, shared by concurrent callers
//! - **Endpoint fallback**: Token exchange walks the configured regional endpoints
//! - **Error classification**: Auth, offline, rate-limit, transport and protocol
//! - **Source fallback**: Ordered [`ReadingSource`]s behind a [`FallbackAggregator`]
//! - **Metrics**: Per-operation request counters and latencies
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stationlog_core::{
//!     ApiClient, ApiClientOptions, ClimateClient, ClimateOptions, ClientMetrics,
//!     FallbackAggregator,
//! };
//! use stationlog_types::Credential;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let metrics = Arc::new(ClientMetrics::new());
//!     let credential = Arc::new(Credential::new(
//!         "access-id",
//!         "access-secret",
//!         "device-id",
//!         "https://openapi.tuyaeu.com",
//!     ));
//!
//!     let primary = ApiClient::with_metrics(credential, ApiClientOptions::default(), metrics.clone())?;
//!     let secondary = ClimateClient::new(ClimateOptions::new(52.52, 13.41), metrics)?;
//!
//!     let aggregator = FallbackAggregator::new(vec![Arc::new(primary), Arc::new(secondary)]);
//!     let reading = aggregator.collect_once().await?;
//!     println!("{} from {}", reading.timestamp, reading.source);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod climate;
pub mod error;
pub mod fallback;
pub mod metrics;
pub mod mock;
pub mod sign;
pub mod source;
pub mod status;
pub mod token;
pub mod transport;

// Re-export types
pub use stationlog_types::types;

// Core exports
pub use client::{ApiClient, ApiClientOptions};
pub use climate::{ClimateClient, ClimateOptions, DEFAULT_CLIMATE_BASE_URL};
pub use error::{AggregateError, Error, Result, SourceFailure};
pub use fallback::FallbackAggregator;
pub use metrics::{ClientMetrics, ClientMetricsSnapshot, Operation, OperationMetrics};
pub use mock::{MockSource, MockSourceBuilder};
pub use sign::{SigningInput, content_hash, sign as sign_request, string_to_sign};
pub use source::ReadingSource;
pub use status::{
    DEFAULT_CLOCK_DRIFT_TOLERANCE, DeviceInfo, NormalizedStatus, RawDeviceStatus, StatusPoint,
};
pub use token::{DEFAULT_SAFETY_MARGIN, Token, TokenCache, TokenExchange};
pub use transport::{CloudTransport, DEFAULT_REQUEST_TIMEOUT, TransportOptions};

// Re-export from stationlog-types
pub use stationlog_types::{CollectionCycleResult, Credential, ErrorKind, Reading, Source};
