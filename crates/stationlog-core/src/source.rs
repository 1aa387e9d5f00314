//! Trait abstraction over reading sources.
//!
//! This module provides the [`ReadingSource`] trait implemented by the cloud
//! device client, the secondary climate client and the mock source used in
//! tests. The [`FallbackAggregator`](crate::FallbackAggregator) works on an
//! ordered list of trait objects.

use async_trait::async_trait;
use stationlog_types::{Reading, Source};

use crate::error::Result;

/// Anything that can produce one normalized [`Reading`] per call.
///
/// Implementations make a single attempt per call and never retry
/// internally.
///
/// # Example
///
/// ```ignore
/// use stationlog_core::{ReadingSource, Result};
///
/// async fn print_reading<S: ReadingSource + ?Sized>(source: &S) -> Result<()> {
///     let reading = source.fetch().await?;
///     println!("{}: {:?} °C", source.source(), reading.temperature);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Tag carried by every reading this source produces.
    fn source(&self) -> Source;

    /// Fetch one reading.
    async fn fetch(&self) -> Result<Reading>;
}
