//! Build the reading sources described by the configuration.

use std::sync::Arc;

use tracing::{info, warn};

use stationlog_core::{ApiClient, ClientMetrics, ClimateClient, FallbackAggregator, ReadingSource};

use crate::config::{Config, ConfigError};

/// Errors raised while wiring sources at startup.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to create client: {0}")]
    Client(#[from] stationlog_core::Error),
}

/// The configured sources.
pub struct Sources {
    /// The cloud device client, also used for diagnostics.
    pub primary: Arc<ApiClient>,
    /// Primary first, then the climate service when configured.
    pub aggregator: Arc<FallbackAggregator>,
}

/// Build the primary client and the fallback chain.
///
/// Fails when credentials are missing or a client cannot be created.
pub fn build_sources(config: &Config, metrics: Arc<ClientMetrics>) -> Result<Sources, SetupError> {
    let credential = Arc::new(config.cloud.credential()?);
    let options = config
        .cloud
        .client_options(config.collector.clock_drift_tolerance());
    let primary = Arc::new(ApiClient::with_metrics(
        credential,
        options,
        Arc::clone(&metrics),
    )?);

    let mut chain: Vec<Arc<dyn ReadingSource>> = vec![primary.clone()];
    match config.climate.options(config.cloud.request_timeout()) {
        Some(options) => {
            info!(
                "Climate fallback enabled at {:.4}, {:.4}",
                options.latitude, options.longitude
            );
            chain.push(Arc::new(ClimateClient::new(options, metrics)?));
        }
        None if config.climate.enabled => {
            warn!("Climate fallback enabled but no coordinates configured; running without it");
        }
        None => info!("Climate fallback disabled"),
    }

    Ok(Sources {
        primary,
        aggregator: Arc::new(FallbackAggregator::new(chain)),
    })
}
