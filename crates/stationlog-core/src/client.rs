//! Authenticated client for the weather station's cloud API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stationlog_types::{Credential, Reading, Source};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::{ClientMetrics, Operation};
use crate::source::ReadingSource;
use crate::status::{DEFAULT_CLOCK_DRIFT_TOLERANCE, DeviceInfo, RawDeviceStatus, StatusPoint};
use crate::token::{Token, TokenCache};
use crate::transport::{CloudTransport, TransportOptions};

/// Options for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientOptions {
    /// Transport settings (timeout, fallback endpoints).
    pub transport: TransportOptions,
    /// Refresh tokens this long before they expire.
    pub token_safety_margin: Duration,
    /// Largest accepted gap between device time and request time.
    pub clock_drift_tolerance: Duration,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            transport: TransportOptions::default(),
            token_safety_margin: crate::token::DEFAULT_SAFETY_MARGIN,
            clock_drift_tolerance: DEFAULT_CLOCK_DRIFT_TOLERANCE,
        }
    }
}

/// Client for the station's device endpoints.
///
/// Each call obtains a token from the [`TokenCache`], signs the request and
/// issues it exactly once. An [`Error::Auth`] from a business call drops the
/// cached token, so the next call re-authenticates; retrying is left to the
/// caller.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use stationlog_core::{ApiClient, ApiClientOptions};
/// use stationlog_types::Credential;
///
/// # async fn example() -> stationlog_core::Result<()> {
/// let credential = Arc::new(Credential::new(
///     "access-id",
///     "access-secret",
///     "device-id",
///     "https://openapi.tuyaeu.com",
/// ));
/// let client = ApiClient::new(credential, ApiClientOptions::default())?;
/// let reading = client.fetch_reading().await?;
/// println!("{:?}", reading.temperature);
/// # Ok(())
/// # }
/// ```
pub struct ApiClient {
    transport: Arc<CloudTransport>,
    tokens: TokenCache,
    clock_drift_tolerance: Duration,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("transport", &self.transport)
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl ApiClient {
    /// Create a client with its own metrics sink.
    pub fn new(credential: Arc<Credential>, options: ApiClientOptions) -> Result<Self> {
        Self::with_metrics(credential, options, Arc::new(ClientMetrics::new()))
    }

    /// Create a client that records into a shared metrics sink.
    pub fn with_metrics(
        credential: Arc<Credential>,
        options: ApiClientOptions,
        metrics: Arc<ClientMetrics>,
    ) -> Result<Self> {
        let transport = Arc::new(CloudTransport::new(credential, options.transport, metrics)?);
        let tokens = TokenCache::with_safety_margin(transport.clone(), options.token_safety_margin);
        Ok(Self {
            transport,
            tokens,
            clock_drift_tolerance: options.clock_drift_tolerance,
        })
    }

    /// The token cache backing this client.
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// The request metrics sink.
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        self.transport.metrics()
    }

    /// Configured station id.
    pub fn device_id(&self) -> &str {
        self.transport.credential().device_id()
    }

    /// Issue a business call with the current token.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        operation: Operation,
    ) -> Result<T> {
        let token: Token = self.tokens.get_valid_token().await?;
        let result = self
            .transport
            .get(&token.endpoint, path, Some(&token.value), operation)
            .await;

        if let Err(Error::Auth { code, message }) = &result {
            warn!(
                "{} rejected token {} (code {:?}: {}), invalidating",
                operation.as_str(),
                token.redacted(),
                code,
                message
            );
            self.tokens.invalidate_if(&token.value).await;
        }
        result
    }

    /// Fetch the raw status data points of a device.
    ///
    /// # Errors
    ///
    /// [`Error::Auth`], [`Error::DeviceOffline`], [`Error::RateLimit`],
    /// [`Error::Transport`] or [`Error::Protocol`].
    pub async fn fetch_device_status(&self, device_id: &str) -> Result<RawDeviceStatus> {
        let requested_at = OffsetDateTime::now_utc();
        let points: Vec<StatusPoint> = self
            .call(
                &format!("/v1.0/devices/{device_id}/status"),
                Operation::DeviceStatus,
            )
            .await?;
        debug!("Device {} reported {} data points", device_id, points.len());

        Ok(RawDeviceStatus {
            device_id: device_id.to_string(),
            points,
            requested_at,
        })
    }

    /// Fetch and normalize the configured station's status.
    pub async fn fetch_reading(&self) -> Result<Reading> {
        let raw = self.fetch_device_status(self.device_id()).await?;
        let normalized = raw.normalize(self.clock_drift_tolerance)?;

        if normalized.clock_drift {
            self.metrics().record_clock_drift();
            warn!(
                "Device clock for {} disagrees with request time (device {:?}, request {}), keyed on request time",
                raw.device_id, normalized.device_time, raw.requested_at
            );
        }
        Ok(normalized.reading)
    }

    /// Fetch device metadata, including the online flag.
    pub async fn fetch_device_info(&self, device_id: &str) -> Result<DeviceInfo> {
        self.call(&format!("/v1.0/devices/{device_id}"), Operation::DeviceInfo)
            .await
    }

    /// List the devices linked to the token's user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the token carries no user id.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let token = self.tokens.get_valid_token().await?;
        let uid = token
            .uid
            .ok_or_else(|| Error::Protocol("token exchange returned no uid".to_string()))?;
        self.call(&format!("/v1.0/users/{uid}/devices"), Operation::DeviceInfo)
            .await
    }
}

#[async_trait]
impl ReadingSource for ApiClient {
    fn source(&self) -> Source {
        Source::PrimaryDevice
    }

    async fn fetch(&self) -> Result<Reading> {
        self.fetch_reading().await
    }
}
