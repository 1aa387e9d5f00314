//! Collector configuration.
//!
//! Loaded from a TOML file, then overlaid with environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TUYA_ACCESS_ID` | `cloud.access_id` |
//! | `TUYA_ACCESS_KEY` | `cloud.access_secret` |
//! | `TUYA_DEVICE_ID` | `cloud.device_id` |
//! | `TUYA_API_ENDPOINT` | `cloud.endpoint` |
//! | `STATION_LATITUDE` | `climate.latitude` |
//! | `STATION_LONGITUDE` | `climate.longitude` |
//! | `COLLECTION_INTERVAL_SECONDS` | `collector.interval_secs` |
//! | `STATIONLOG_DATABASE` | `storage.path` |
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "/var/lib/stationlog/weather.db"
//! retention_days = 365
//!
//! [cloud]
//! access_id = "..."
//! access_secret = "..."
//! device_id = "..."
//! endpoint = "https://openapi.tuyaeu.com"
//!
//! [climate]
//! latitude = 52.52
//! longitude = 13.41
//!
//! [collector]
//! interval_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use stationlog_core::{ApiClientOptions, ClimateOptions, TransportOptions};
use stationlog_types::Credential;

/// Collector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP API settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Cloud platform credentials and transport settings.
    pub cloud: CloudConfig,
    /// Secondary climate source.
    pub climate: ClimateConfig,
    /// Schedule and retry policy.
    pub collector: CollectorConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, which maps a variable name to its value.
    ///
    /// Empty values are ignored. Numbers that do not parse are reported
    /// together as a [`ConfigError::Validation`].
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut errors = Vec::new();

        if let Some(v) = get("TUYA_ACCESS_ID") {
            self.cloud.access_id = v;
        }
        if let Some(v) = get("TUYA_ACCESS_KEY") {
            self.cloud.access_secret = v;
        }
        if let Some(v) = get("TUYA_DEVICE_ID") {
            self.cloud.device_id = v;
        }
        if let Some(v) = get("TUYA_API_ENDPOINT") {
            self.cloud.endpoint = v;
        }
        if let Some(v) = get("STATIONLOG_DATABASE") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = get("STATION_LATITUDE") {
            match v.parse::<f64>() {
                Ok(lat) => self.climate.latitude = Some(lat),
                Err(_) => errors.push(env_error("STATION_LATITUDE", &v, "a number")),
            }
        }
        if let Some(v) = get("STATION_LONGITUDE") {
            match v.parse::<f64>() {
                Ok(lon) => self.climate.longitude = Some(lon),
                Err(_) => errors.push(env_error("STATION_LONGITUDE", &v, "a number")),
            }
        }
        if let Some(v) = get("COLLECTION_INTERVAL_SECONDS") {
            match v.parse::<u64>() {
                Ok(secs) => self.collector.interval_secs = secs,
                Err(_) => errors.push(env_error(
                    "COLLECTION_INTERVAL_SECONDS",
                    &v,
                    "a whole number of seconds",
                )),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Validate the configuration and return any errors.
    ///
    /// Credentials are not required here; see [`CloudConfig::credential`].
    ///
    /// ```
    /// use stationlog_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.cloud.validate());
        errors.extend(self.climate.validate());
        errors.extend(self.collector.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load, overlay the environment and validate.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }
}

fn env_error(var: &str, value: &str, expected: &str) -> ValidationError {
    ValidationError {
        field: var.to_string(),
        message: format!("'{}' is not {}", value, expected),
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            }),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: "port cannot be 0".to_string(),
                }),
                Err(_) => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!("invalid port '{}': must be a number 1-65535", port),
                }),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Delete readings older than this many days. Unset keeps everything.
    pub retention_days: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: stationlog_store::default_db_path(),
            retention_days: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }
        if self.retention_days == Some(0) {
            errors.push(ValidationError {
                field: "storage.retention_days".to_string(),
                message: "retention must be at least 1 day (omit to keep everything)".to_string(),
            });
        }

        errors
    }

    /// Retention window, if pruning is enabled.
    pub fn retention(&self) -> Option<time::Duration> {
        self.retention_days
            .map(|days| time::Duration::days(i64::from(days)))
    }
}

/// Default regional endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://openapi.tuyaeu.com";

/// Cloud platform configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Client (access) id.
    pub access_id: String,
    /// Signing secret.
    pub access_secret: String,
    /// Weather station device id.
    pub device_id: String,
    /// Preferred regional endpoint.
    pub endpoint: String,
    /// Endpoints tried after `endpoint`, in order.
    pub fallback_endpoints: Vec<String>,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Refresh tokens this long before they expire.
    pub token_safety_margin_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            access_id: String::new(),
            access_secret: String::new(),
            device_id: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            fallback_endpoints: vec![
                "https://openapi.tuyaus.com".to_string(),
                "https://openapi.tuyacn.com".to_string(),
            ],
            request_timeout_secs: 30,
            token_safety_margin_secs: 60,
        }
    }
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("access_id", &self.access_id)
            .field("access_secret", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("endpoint", &self.endpoint)
            .field("fallback_endpoints", &self.fallback_endpoints)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("token_safety_margin_secs", &self.token_safety_margin_secs)
            .finish()
    }
}

impl CloudConfig {
    /// Validate endpoint and timing settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !is_http_url(&self.endpoint) {
            errors.push(ValidationError {
                field: "cloud.endpoint".to_string(),
                message: format!("'{}' is not an http(s) URL", self.endpoint),
            });
        }
        for (i, endpoint) in self.fallback_endpoints.iter().enumerate() {
            if !is_http_url(endpoint) {
                errors.push(ValidationError {
                    field: format!("cloud.fallback_endpoints[{}]", i),
                    message: format!("'{}' is not an http(s) URL", endpoint),
                });
            }
        }
        if self.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "cloud.request_timeout_secs".to_string(),
                message: "request timeout cannot be 0".to_string(),
            });
        }

        errors
    }

    /// Build the credential set, failing when any part is missing.
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        let required = [
            ("cloud.access_id", "TUYA_ACCESS_ID", &self.access_id),
            ("cloud.access_secret", "TUYA_ACCESS_KEY", &self.access_secret),
            ("cloud.device_id", "TUYA_DEVICE_ID", &self.device_id),
        ];
        let errors: Vec<ValidationError> = required
            .iter()
            .filter(|(_, _, value)| value.trim().is_empty())
            .map(|(field, var, _)| ValidationError {
                field: field.to_string(),
                message: format!("missing (set it in the config file or {})", var),
            })
            .collect();

        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        Ok(Credential::new(
            self.access_id.trim(),
            self.access_secret.trim(),
            self.device_id.trim(),
            self.endpoint.trim(),
        ))
    }

    /// Client options derived from this section.
    pub fn client_options(&self, clock_drift_tolerance: Duration) -> ApiClientOptions {
        ApiClientOptions {
            transport: TransportOptions {
                request_timeout: self.request_timeout(),
                fallback_endpoints: self
                    .fallback_endpoints
                    .iter()
                    .filter(|e| e.trim_end_matches('/') != self.endpoint.trim_end_matches('/'))
                    .cloned()
                    .collect(),
            },
            token_safety_margin: Duration::from_secs(self.token_safety_margin_secs),
            clock_drift_tolerance,
        }
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Secondary climate source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateConfig {
    /// Use the climate service when the station cannot be read.
    pub enabled: bool,
    /// Station latitude.
    pub latitude: Option<f64>,
    /// Station longitude.
    pub longitude: Option<f64>,
    /// Service base URL.
    pub base_url: String,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latitude: None,
            longitude: None,
            base_url: stationlog_core::DEFAULT_CLIMATE_BASE_URL.to_string(),
        }
    }
}

impl ClimateConfig {
    /// Validate coordinates and base URL.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(lat) = self.latitude
            && !(-90.0..=90.0).contains(&lat)
        {
            errors.push(ValidationError {
                field: "climate.latitude".to_string(),
                message: format!("latitude {} is outside -90..90", lat),
            });
        }
        if let Some(lon) = self.longitude
            && !(-180.0..=180.0).contains(&lon)
        {
            errors.push(ValidationError {
                field: "climate.longitude".to_string(),
                message: format!("longitude {} is outside -180..180", lon),
            });
        }
        if self.latitude.is_some() != self.longitude.is_some() {
            errors.push(ValidationError {
                field: "climate".to_string(),
                message: "latitude and longitude must be set together".to_string(),
            });
        }
        if self.enabled && !is_http_url(&self.base_url) {
            errors.push(ValidationError {
                field: "climate.base_url".to_string(),
                message: format!("'{}' is not an http(s) URL", self.base_url),
            });
        }

        errors
    }

    /// Client options, when the source is enabled and located.
    pub fn options(&self, request_timeout: Duration) -> Option<ClimateOptions> {
        if !self.enabled {
            return None;
        }
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        Some(ClimateOptions {
            base_url: self.base_url.clone(),
            latitude,
            longitude,
            request_timeout,
        })
    }
}

/// Minimum collection interval in seconds.
pub const MIN_INTERVAL_SECS: u64 = 10;
/// Maximum collection interval in seconds (1 day).
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Schedule and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Seconds between cycles.
    pub interval_secs: u64,
    /// Upper bound of the random delay added to each tick.
    pub jitter_secs: u64,
    /// Sub-attempts per cycle.
    pub max_attempts: u32,
    /// First backoff delay.
    pub backoff_base_secs: u64,
    /// Backoff multiplier.
    pub backoff_factor: f64,
    /// Longest backoff delay.
    pub backoff_cap_secs: u64,
    /// Time an in-flight cycle gets to finish on shutdown.
    pub shutdown_grace_secs: u64,
    /// Largest accepted gap between device time and request time.
    pub clock_drift_tolerance_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            jitter_secs: 15,
            max_attempts: 3,
            backoff_base_secs: 30,
            backoff_factor: 2.0,
            backoff_cap_secs: 600,
            shutdown_grace_secs: 30,
            clock_drift_tolerance_secs: 300,
        }
    }
}

impl CollectorConfig {
    /// Validate schedule and retry settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_secs < MIN_INTERVAL_SECS {
            errors.push(ValidationError {
                field: "collector.interval_secs".to_string(),
                message: format!(
                    "interval {} is too short (minimum {} seconds)",
                    self.interval_secs, MIN_INTERVAL_SECS
                ),
            });
        } else if self.interval_secs > MAX_INTERVAL_SECS {
            errors.push(ValidationError {
                field: "collector.interval_secs".to_string(),
                message: format!(
                    "interval {} is too long (maximum {} seconds / 1 day)",
                    self.interval_secs, MAX_INTERVAL_SECS
                ),
            });
        }
        if self.jitter_secs >= self.interval_secs {
            errors.push(ValidationError {
                field: "collector.jitter_secs".to_string(),
                message: "jitter must be shorter than the interval".to_string(),
            });
        }
        if self.max_attempts == 0 {
            errors.push(ValidationError {
                field: "collector.max_attempts".to_string(),
                message: "at least one attempt is required".to_string(),
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            errors.push(ValidationError {
                field: "collector.backoff_factor".to_string(),
                message: format!("factor {} must be at least 1.0", self.backoff_factor),
            });
        }
        if self.backoff_cap_secs < self.backoff_base_secs {
            errors.push(ValidationError {
                field: "collector.backoff_cap_secs".to_string(),
                message: "cap cannot be shorter than the base delay".to_string(),
            });
        }

        errors
    }

    /// Seconds between cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Tick jitter bound.
    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Clock drift tolerance.
    pub fn clock_drift_tolerance(&self) -> Duration {
        Duration::from_secs(self.clock_drift_tolerance_secs)
    }
}

fn is_http_url(s: &str) -> bool {
    let s = s.trim();
    (s.starts_with("http://") && s.len() > "http://".len())
        || (s.starts_with("https://") && s.len() > "https://".len())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind`) or environment variable.
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stationlog")
        .join("collector.toml")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn fields(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.cloud.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.collector.interval_secs, 300);
        assert_eq!(config.collector.jitter_secs, 15);
        assert_eq!(config.collector.max_attempts, 3);
        assert_eq!(config.collector.backoff_cap_secs, 600);
        assert!(config.storage.retention_days.is_none());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [cloud]
            access_id = "abc"

            [collector]
            interval_secs = 600
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cloud.access_id, "abc");
        assert_eq!(config.cloud.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.collector.interval_secs, 600);
        assert_eq!(config.collector.max_attempts, 3);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("collector.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.storage.path = PathBuf::from("/tmp/weather.db");
        config.storage.retention_days = Some(30);
        config.climate.latitude = Some(48.2);
        config.climate.longitude = Some(16.37);

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.storage.path, PathBuf::from("/tmp/weather.db"));
        assert_eq!(loaded.storage.retention_days, Some(30));
        assert_eq!(loaded.climate.latitude, Some(48.2));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/collector.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("TUYA_ACCESS_ID", "id-1"),
                ("TUYA_ACCESS_KEY", "secret-1"),
                ("TUYA_DEVICE_ID", "dev-1"),
                ("TUYA_API_ENDPOINT", "https://openapi.tuyaus.com"),
                ("STATION_LATITUDE", "47.5"),
                ("STATION_LONGITUDE", " 8.25 "),
                ("COLLECTION_INTERVAL_SECONDS", "120"),
                ("STATIONLOG_DATABASE", "/data/w.db"),
            ]))
            .unwrap();

        assert_eq!(config.cloud.access_id, "id-1");
        assert_eq!(config.cloud.access_secret, "secret-1");
        assert_eq!(config.cloud.device_id, "dev-1");
        assert_eq!(config.cloud.endpoint, "https://openapi.tuyaus.com");
        assert_eq!(config.climate.latitude, Some(47.5));
        assert_eq!(config.climate.longitude, Some(8.25));
        assert_eq!(config.collector.interval_secs, 120);
        assert_eq!(config.storage.path, PathBuf::from("/data/w.db"));
    }

    #[test]
    fn test_env_overlay_ignores_empty_values() {
        let mut config = Config::default();
        config.cloud.access_id = "from-file".to_string();
        config
            .apply_env_from(env(&[("TUYA_ACCESS_ID", "  ")]))
            .unwrap();
        assert_eq!(config.cloud.access_id, "from-file");
    }

    #[test]
    fn test_env_overlay_malformed_numbers() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(env(&[
                ("COLLECTION_INTERVAL_SECONDS", "five minutes"),
                ("STATION_LATITUDE", "north"),
            ]))
            .unwrap_err();
        let fields = fields(err);
        assert!(fields.contains(&"COLLECTION_INTERVAL_SECONDS".to_string()));
        assert!(fields.contains(&"STATION_LATITUDE".to_string()));
        assert_eq!(config.collector.interval_secs, 300);
    }

    #[test]
    fn test_credential_requires_all_parts() {
        let config = Config::default();
        let fields = fields(config.cloud.credential().unwrap_err());
        assert_eq!(
            fields,
            vec!["cloud.access_id", "cloud.access_secret", "cloud.device_id"]
        );

        let mut cloud = CloudConfig::default();
        cloud.access_id = "id".to_string();
        cloud.access_secret = "secret".to_string();
        cloud.device_id = "dev".to_string();
        cloud.endpoint = "https://openapi.tuyaus.com/".to_string();
        let cred = cloud.credential().unwrap();
        assert_eq!(cred.region_endpoint(), "https://openapi.tuyaus.com");
    }

    #[test]
    fn test_cloud_debug_redacts_secret() {
        let mut cloud = CloudConfig::default();
        cloud.access_secret = "hunter2".to_string();
        assert!(!format!("{:?}", cloud).contains("hunter2"));
    }

    #[test]
    fn test_client_options_skip_primary_endpoint() {
        let mut cloud = CloudConfig::default();
        cloud.endpoint = "https://openapi.tuyaus.com".to_string();
        let options = cloud.client_options(Duration::from_secs(300));
        assert_eq!(
            options.transport.fallback_endpoints,
            vec!["https://openapi.tuyacn.com".to_string()]
        );
        assert_eq!(options.transport.request_timeout, Duration::from_secs(30));
        assert_eq!(options.token_safety_margin, Duration::from_secs(60));
    }

    #[test]
    fn test_server_bind_validation() {
        let valid = ServerConfig {
            bind: "[::1]:8080".to_string(),
        };
        assert!(valid.validate().is_empty());

        let no_port = ServerConfig {
            bind: "127.0.0.1".to_string(),
        };
        assert!(no_port.validate()[0].message.contains("host:port"));

        let port_zero = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        };
        assert!(port_zero.validate()[0].message.contains("cannot be 0"));

        let bad_port = ServerConfig {
            bind: "127.0.0.1:abc".to_string(),
        };
        assert!(bad_port.validate()[0].message.contains("must be a number"));
    }

    #[test]
    fn test_storage_validation() {
        let config = StorageConfig {
            path: PathBuf::new(),
            retention_days: Some(0),
        };
        assert_eq!(config.validate().len(), 2);

        let config = StorageConfig {
            path: PathBuf::from("w.db"),
            retention_days: Some(7),
        };
        assert!(config.validate().is_empty());
        assert_eq!(config.retention(), Some(time::Duration::days(7)));
    }

    #[test]
    fn test_climate_validation_and_options() {
        let mut climate = ClimateConfig::default();
        assert!(climate.validate().is_empty());
        assert!(climate.options(Duration::from_secs(5)).is_none());

        climate.latitude = Some(95.0);
        let errors = climate.validate();
        assert!(errors.iter().any(|e| e.field == "climate.latitude"));
        assert!(errors.iter().any(|e| e.field == "climate"));

        climate.latitude = Some(52.5);
        climate.longitude = Some(13.4);
        assert!(climate.validate().is_empty());
        let options = climate.options(Duration::from_secs(5)).unwrap();
        assert_eq!(options.latitude, 52.5);
        assert_eq!(options.request_timeout, Duration::from_secs(5));

        climate.enabled = false;
        assert!(climate.options(Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_collector_validation() {
        let config = CollectorConfig {
            interval_secs: 5,
            jitter_secs: 5,
            max_attempts: 0,
            backoff_base_secs: 60,
            backoff_factor: 0.5,
            backoff_cap_secs: 30,
            ..Default::default()
        };
        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "collector.interval_secs",
                "collector.jitter_secs",
                "collector.max_attempts",
                "collector.backoff_factor",
                "collector.backoff_cap_secs",
            ]
        );
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("stationlog/collector.toml"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError {
                field: "server.bind".to_string(),
                message: "port cannot be 0".to_string(),
            },
            ValidationError {
                field: "cloud.device_id".to_string(),
                message: "missing".to_string(),
            },
        ]);
        let display = format!("{}", error);
        assert!(display.contains("server.bind: port cannot be 0"));
        assert!(display.contains("cloud.device_id"));
    }
}
