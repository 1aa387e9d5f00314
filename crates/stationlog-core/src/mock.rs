//! Mock reading source for testing.
//!
//! This module provides a mock source that can be used for unit testing
//! without network access.
//!
//! The [`MockSource`] implements the [`ReadingSource`] trait, allowing it to be
//! used interchangeably with real clients in the fallback chain.
//!
//! # Features
//!
//! - **Scripted failures**: Queue errors to be returned by the next fetches
//! - **Failure injection**: Make every fetch fail with a given error
//! - **Latency simulation**: Add artificial delays to simulate slow upstreams

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use stationlog_types::{Reading, Source};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::source::ReadingSource;

/// A scripted reading source for testing.
///
/// Successful fetches return the configured reading template, stamped with
/// the current time unless a fixed timestamp was set.
///
/// # Example
///
/// ```
/// use stationlog_core::{Error, MockSource, ReadingSource};
/// use stationlog_types::Source;
///
/// #[tokio::main]
/// async fn main() {
///     let source = MockSource::new(Source::PrimaryDevice);
///     source
///         .push_failure(Error::Transport {
///             operation: "device_status".into(),
///             message: "connection refused".into(),
///         })
///         .await;
///
///     assert!(source.fetch().await.is_err());
///     assert!(source.fetch().await.is_ok());
///     assert_eq!(source.fetch_count(), 2);
/// }
/// ```
pub struct MockSource {
    source: Source,
    template: RwLock<Reading>,
    fixed_timestamp: AtomicBool,
    fetch_count: AtomicU32,
    scripted: Mutex<VecDeque<Error>>,
    fail_with: RwLock<Option<Error>>,
    /// Simulated fetch latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSource")
            .field("source", &self.source)
            .field("fetch_count", &self.fetch_count.load(Ordering::Relaxed))
            .field("latency_ms", &self.latency_ms.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockSource {
    /// Create a mock source with a default reading.
    pub fn new(source: Source) -> Self {
        MockSourceBuilder::new(source).build()
    }

    fn default_reading(source: Source) -> Reading {
        Reading::builder(OffsetDateTime::now_utc(), source)
            .temperature(21.5)
            .humidity(55.0)
            .pressure(1013.2)
            .wind_speed(2.4)
            .wind_direction(180.0)
            .uv_index(3.0)
            .build()
    }

    /// Number of fetches performed, successful or not.
    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Reset the fetch counter.
    pub fn reset_fetch_count(&self) {
        self.fetch_count.store(0, Ordering::Relaxed);
    }

    // --- Test control methods ---

    /// Replace the reading template.
    pub async fn set_reading(&self, reading: Reading) {
        *self.template.write().await = reading;
    }

    /// Pin the timestamp of returned readings to the template's.
    pub fn set_fixed_timestamp(&self, fixed: bool) {
        self.fixed_timestamp.store(fixed, Ordering::Relaxed);
    }

    /// Queue an error for the next fetch. Queued errors are consumed in
    /// order before any other behavior applies.
    pub async fn push_failure(&self, error: Error) {
        self.scripted.lock().await.push_back(error);
    }

    /// Queue `count` copies of an error.
    pub async fn push_failures(&self, error: Error, count: usize) {
        let mut scripted = self.scripted.lock().await;
        for _ in 0..count {
            scripted.push_back(error.clone());
        }
    }

    /// Make every fetch fail with `error`, or clear with `None`.
    pub async fn set_fail_with(&self, error: Option<Error>) {
        *self.fail_with.write().await = error;
    }

    /// Set simulated fetch latency.
    ///
    /// Set to `Duration::ZERO` to disable latency simulation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl ReadingSource for MockSource {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch(&self) -> Result<Reading> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if let Some(error) = self.scripted.lock().await.pop_front() {
            return Err(error);
        }
        if let Some(error) = self.fail_with.read().await.clone() {
            return Err(error);
        }

        let mut reading = self.template.read().await.clone();
        reading.source = self.source;
        if !self.fixed_timestamp.load(Ordering::Relaxed) {
            reading.timestamp = OffsetDateTime::now_utc();
        }
        Ok(reading)
    }
}

/// Builder for creating mock sources with custom settings.
#[derive(Debug, Clone)]
pub struct MockSourceBuilder {
    source: Source,
    reading: Option<Reading>,
    fixed_timestamp: bool,
    latency: Duration,
    fail_with: Option<Error>,
}

impl MockSourceBuilder {
    /// Create a new builder.
    pub fn new(source: Source) -> Self {
        Self {
            source,
            reading: None,
            fixed_timestamp: false,
            latency: Duration::ZERO,
            fail_with: None,
        }
    }

    /// Set the reading template. Its timestamp is kept.
    #[must_use]
    pub fn reading(mut self, reading: Reading) -> Self {
        self.reading = Some(reading);
        self.fixed_timestamp = true;
        self
    }

    /// Set the simulated latency.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every fetch with `error`.
    #[must_use]
    pub fn fail_with(mut self, error: Error) -> Self {
        self.fail_with = Some(error);
        self
    }

    /// Build the mock source.
    #[must_use]
    pub fn build(self) -> MockSource {
        let reading = self
            .reading
            .unwrap_or_else(|| MockSource::default_reading(self.source));
        MockSource {
            source: self.source,
            template: RwLock::new(reading),
            fixed_timestamp: AtomicBool::new(self.fixed_timestamp),
            fetch_count: AtomicU32::new(0),
            scripted: Mutex::new(VecDeque::new()),
            fail_with: RwLock::new(self.fail_with),
            latency_ms: AtomicU64::new(self.latency.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline() -> Error {
        Error::DeviceOffline {
            code: Some(2001),
            message: "device is offline".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_source_default_reading() {
        let source = MockSource::new(Source::SecondaryClimate);
        let reading = source.fetch().await.unwrap();
        assert_eq!(reading.source, Source::SecondaryClimate);
        assert_eq!(reading.temperature, Some(21.5));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let source = MockSource::new(Source::PrimaryDevice);
        source.push_failure(offline()).await;
        source
            .push_failure(Error::Protocol("garbled".to_string()))
            .await;

        assert!(matches!(source.fetch().await, Err(Error::DeviceOffline { .. })));
        assert!(matches!(source.fetch().await, Err(Error::Protocol(_))));
        assert!(source.fetch().await.is_ok());
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_fail_with_persists_until_cleared() {
        let source = MockSourceBuilder::new(Source::PrimaryDevice)
            .fail_with(offline())
            .build();
        assert!(source.fetch().await.is_err());
        assert!(source.fetch().await.is_err());

        source.set_fail_with(None).await;
        assert!(source.fetch().await.is_ok());
    }

    #[tokio::test]
    async fn test_fixed_reading_keeps_timestamp() {
        let at = OffsetDateTime::from_unix_timestamp(1_753_354_500).unwrap();
        let source = MockSourceBuilder::new(Source::PrimaryDevice)
            .reading(Reading::builder(at, Source::PrimaryDevice).humidity(40.0).build())
            .build();
        let reading = source.fetch().await.unwrap();
        assert_eq!(reading.timestamp, at);
        assert_eq!(reading.humidity, Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let source = MockSourceBuilder::new(Source::PrimaryDevice)
            .latency(Duration::from_secs(5))
            .build();
        let started = tokio::time::Instant::now();
        source.fetch().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_debug_output() {
        let source = MockSource::new(Source::PrimaryDevice);
        let debug = format!("{source:?}");
        assert!(debug.contains("MockSource"));
        assert!(debug.contains("PrimaryDevice"));
    }
}
