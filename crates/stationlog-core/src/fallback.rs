//! Ordered fallback across reading sources.

use std::sync::Arc;
use std::time::Instant;

use stationlog_types::{Reading, Source};
use tracing::{debug, info, warn};

use crate::error::{AggregateError, Error, SourceFailure};
use crate::source::ReadingSource;

/// Tries each source in order until one produces a reading.
///
/// A source failing with an auth, offline, rate-limit or transport error
/// hands over to the next source in the same cycle. A protocol error ends
/// the cycle. Readings are returned as produced: sources are never blended.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stationlog_core::{Error, FallbackAggregator, MockSource};
/// use stationlog_types::Source;
///
/// #[tokio::main]
/// async fn main() {
///     let primary = Arc::new(MockSource::new(Source::PrimaryDevice));
///     primary
///         .set_fail_with(Some(Error::DeviceOffline { code: Some(2001), message: "offline".into() }))
///         .await;
///     let secondary = Arc::new(MockSource::new(Source::SecondaryClimate));
///
///     let aggregator = FallbackAggregator::new(vec![primary, secondary]);
///     let reading = aggregator.collect_once().await.unwrap();
///     assert_eq!(reading.source, Source::SecondaryClimate);
/// }
/// ```
#[derive(Clone)]
pub struct FallbackAggregator {
    sources: Vec<Arc<dyn ReadingSource>>,
}

impl std::fmt::Debug for FallbackAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackAggregator")
            .field("sources", &self.sources())
            .finish()
    }
}

impl FallbackAggregator {
    /// Create an aggregator over sources in priority order.
    pub fn new(sources: Vec<Arc<dyn ReadingSource>>) -> Self {
        Self { sources }
    }

    /// Source tags in priority order.
    pub fn sources(&self) -> Vec<Source> {
        self.sources.iter().map(|s| s.source()).collect()
    }

    /// Whether no source is configured.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Run one pass over the sources.
    ///
    /// # Errors
    ///
    /// Returns an [`AggregateError`] listing every attempt when no source
    /// produced a reading.
    pub async fn collect_once(&self) -> Result<Reading, AggregateError> {
        let mut attempts = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let tag = source.source();
            let started = Instant::now();
            let result = source.fetch().await.and_then(|reading| {
                if reading.source == tag {
                    Ok(reading)
                } else {
                    Err(Error::Protocol(format!(
                        "source {tag} produced a reading tagged {}",
                        reading.source
                    )))
                }
            });

            match result {
                Ok(reading) => {
                    if attempts.is_empty() {
                        debug!("Reading from {} in {:?}", tag, started.elapsed());
                    } else {
                        info!(
                            "Reading from fallback source {} after {} failed attempt(s)",
                            tag,
                            attempts.len()
                        );
                    }
                    return Ok(reading);
                }
                Err(error) => {
                    let fall_through = error.triggers_fallback();
                    warn!(
                        "Source {} failed after {:?}: {}{}",
                        tag,
                        started.elapsed(),
                        error,
                        if fall_through { "" } else { " (not falling back)" }
                    );
                    attempts.push(SourceFailure { source: tag, error });
                    if !fall_through {
                        break;
                    }
                }
            }
        }

        Err(AggregateError::new(attempts))
    }
}
