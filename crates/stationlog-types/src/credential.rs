//! Cloud platform credentials.

use core::fmt;

/// Credentials for the cloud device API.
///
/// Built once at startup from configuration and shared read-only for the
/// life of the process. Never persisted alongside readings. The `Debug`
/// implementation redacts the secret so credentials can appear in logs.
///
/// ```
/// use stationlog_types::Credential;
///
/// let cred = Credential::new("id", "very-secret", "device", "https://openapi.tuyaeu.com");
/// assert!(!format!("{cred:?}").contains("very-secret"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_id: String,
    access_secret: String,
    device_id: String,
    region_endpoint: String,
}

impl Credential {
    /// Create a credential set. Trailing slashes on the endpoint are trimmed.
    pub fn new(
        access_id: impl Into<String>,
        access_secret: impl Into<String>,
        device_id: impl Into<String>,
        region_endpoint: impl Into<String>,
    ) -> Self {
        let region_endpoint: String = region_endpoint.into();
        Self {
            access_id: access_id.into(),
            access_secret: access_secret.into(),
            device_id: device_id.into(),
            region_endpoint: region_endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Client (access) id issued by the platform.
    pub fn access_id(&self) -> &str {
        &self.access_id
    }

    /// HMAC signing secret.
    pub fn access_secret(&self) -> &str {
        &self.access_secret
    }

    /// Id of the weather station device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Base URL of the preferred regional endpoint.
    pub fn region_endpoint(&self) -> &str {
        &self.region_endpoint
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_id", &self.access_id)
            .field("access_secret", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("region_endpoint", &self.region_endpoint)
            .finish()
    }
}
