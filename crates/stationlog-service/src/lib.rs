//! Scheduled collector and read-only HTTP API for a cloud weather station.
//!
//! This crate provides a service that:
//! - Polls the station through the cloud API on a fixed, jittered cadence
//! - Falls back to a public climate service when the station cannot be read
//! - Retries transient failures with capped exponential backoff
//! - Stores deduplicated readings in the local database
//! - Exposes status, readings and Prometheus metrics over HTTP
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Collector phase, counters, recent cycles, request metrics
//! - `GET /api/readings` - Query readings with filters
//! - `GET /api/readings/latest` - Newest stored reading
//! - `GET /api/stats` - Store totals per source
//! - `GET /api/stats/daily` - Per-day aggregates and collection counters
//! - `GET /metrics` - Prometheus text format
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/stationlog/collector.toml`,
//! then applies environment overrides (see [`config`]):
//!
//! ```toml
//! [cloud]
//! access_id = "..."
//! access_secret = "..."
//! device_id = "..."
//!
//! [climate]
//! latitude = 52.52
//! longitude = 13.41
//! ```

pub mod api;
pub mod backoff;
pub mod collector;
pub mod config;
pub mod sources;
pub mod state;

pub use backoff::BackoffPolicy;
pub use collector::Collector;
pub use config::{
    ClimateConfig, CloudConfig, CollectorConfig, Config, ConfigError, ServerConfig, StorageConfig,
    ValidationError,
};
pub use sources::{SetupError, Sources, build_sources};
pub use state::{AppState, CollectorPhase, CollectorState, CollectorStats};
