//! Signed HTTP transport for the cloud device API.
//!
//! [`CloudTransport`] issues one signed `GET` per call, unwraps the platform's
//! response envelope and classifies failures into [`Error`] variants:
//!
//! | Condition | Error |
//! |-----------|-------|
//! | connect failure, timeout, HTTP 5xx or other non-2xx | [`Error::Transport`] |
//! | HTTP 429, or an envelope message about request frequency | [`Error::RateLimit`] |
//! | HTTP 401/403, envelope codes 1004, 1010, 1011, 1012, 1013 | [`Error::Auth`] |
//! | envelope codes 1106, 2001 | [`Error::DeviceOffline`] |
//! | unparseable body, missing `result`, any other code | [`Error::Protocol`] |
//!
//! Regional endpoints are tried in an explicit order during the token
//! exchange; the endpoint that issues the token is pinned on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use stationlog_types::Credential;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::{ClientMetrics, Operation};
use crate::sign::{self, SIGN_METHOD, SigningInput, headers};
use crate::token::{Token, TokenExchange};

/// Path of the credential exchange.
pub const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";

/// Default lifetime assumed when the exchange omits `expire_time`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(7200);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope codes meaning the credentials, signature or token were rejected.
pub const AUTH_CODES: &[i64] = &[1004, 1010, 1011, 1012, 1013];

/// Envelope codes meaning the station cannot be reached through the platform.
pub const DEVICE_UNAVAILABLE_CODES: &[i64] = &[1106, 2001];

/// Options for [`CloudTransport`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Timeout applied to every request.
    pub request_timeout: Duration,
    /// Endpoints tried after the credential's region endpoint, in order.
    pub fallback_endpoints: Vec<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            fallback_endpoints: Vec::new(),
        }
    }
}

/// Platform response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// `result` of the credential exchange.
#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
    #[serde(default)]
    expire_time: Option<u64>,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Signed single-attempt HTTP client for the cloud device API.
pub struct CloudTransport {
    http: Client,
    credential: Arc<Credential>,
    candidates: Vec<String>,
    metrics: Arc<ClientMetrics>,
}

impl std::fmt::Debug for CloudTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudTransport")
            .field("credential", &self.credential)
            .field("candidates", &self.candidates)
            .finish()
    }
}

impl CloudTransport {
    /// Create a transport for `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the HTTP client cannot be built or
    /// no endpoint is usable.
    pub fn new(
        credential: Arc<Credential>,
        options: TransportOptions,
        metrics: Arc<ClientMetrics>,
    ) -> Result<Self> {
        let mut candidates = Vec::with_capacity(1 + options.fallback_endpoints.len());
        for endpoint in std::iter::once(credential.region_endpoint().to_string())
            .chain(options.fallback_endpoints)
        {
            let endpoint = endpoint.trim_end_matches('/').to_string();
            if endpoint.is_empty() || candidates.contains(&endpoint) {
                continue;
            }
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(Error::InvalidConfig(format!(
                    "endpoint must start with http:// or https://, got: {endpoint}"
                )));
            }
            candidates.push(endpoint);
        }
        if candidates.is_empty() {
            return Err(Error::InvalidConfig("no API endpoint configured".to_string()));
        }

        let http = Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!("stationlog/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            credential,
            candidates,
            metrics,
        })
    }

    /// The credential requests are signed with.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Endpoints tried by the token exchange, in order.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Shared metrics sink.
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    /// Issue one signed `GET` and decode the envelope `result` into `T`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path_with_query: &str,
        access_token: Option<&str>,
        operation: Operation,
    ) -> Result<T> {
        let started = Instant::now();
        let result = self
            .get_inner(endpoint, path_with_query, access_token, operation)
            .await;
        self.metrics
            .record(operation, result.is_ok(), started.elapsed());
        result
    }

    async fn get_inner<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path_with_query: &str,
        access_token: Option<&str>,
        operation: Operation,
    ) -> Result<T> {
        let op = operation.as_str();
        let url = format!("{endpoint}{path_with_query}");
        let headers = self.signed_headers("GET", path_with_query, b"", access_token)?;

        debug!("GET {} ({})", url, op);
        let response = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| Error::transport(op, &e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimit {
                retry_after: parse_retry_after(response.headers()),
                message: format!("HTTP 429 from {op}"),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Auth {
                code: None,
                message: format!("HTTP {} from {op}", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(Error::Transport {
                operation: op.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(op, &e))?;

        decode_envelope(&body, retry_after)
    }

    fn signed_headers(
        &self,
        method: &str,
        path_with_query: &str,
        body: &[u8],
        access_token: Option<&str>,
    ) -> Result<HeaderMap> {
        let timestamp_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let body_hash = sign::content_hash(body);
        let signature = sign::sign(
            &SigningInput {
                method,
                path_with_query,
                body_hash: &body_hash,
                timestamp_ms,
                access_token,
            },
            &self.credential,
        );

        let mut map = HeaderMap::new();
        map.insert(headers::CLIENT_ID, header_value(self.credential.access_id())?);
        map.insert(headers::SIGN, header_value(&signature)?);
        map.insert(headers::SIGN_METHOD, HeaderValue::from_static(SIGN_METHOD));
        map.insert(headers::TIMESTAMP, header_value(&timestamp_ms.to_string())?);
        if let Some(token) = access_token {
            map.insert(headers::ACCESS_TOKEN, header_value(token)?);
        }
        Ok(map)
    }

    async fn exchange_at(&self, endpoint: &str) -> Result<Token> {
        let requested_at = OffsetDateTime::now_utc();
        let result: TokenResult = self
            .get(endpoint, TOKEN_PATH, None, Operation::TokenExchange)
            .await?;

        if result.access_token.is_empty() {
            return Err(Error::Protocol("token exchange returned an empty token".to_string()));
        }

        let lifetime = result
            .expire_time
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        Ok(Token {
            value: result.access_token,
            expires_at: requested_at + lifetime,
            uid: result.uid,
            refresh_token: result.refresh_token,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl TokenExchange for CloudTransport {
    /// Try each candidate endpoint in order. Auth and transport failures move
    /// on to the next candidate; anything else stops the search.
    async fn exchange(&self) -> Result<Token> {
        let mut last_error = None;

        for (i, endpoint) in self.candidates.iter().enumerate() {
            match self.exchange_at(endpoint).await {
                Ok(token) => {
                    if i > 0 {
                        warn!(
                            "Token issued by fallback endpoint {} (candidate {} of {})",
                            endpoint,
                            i + 1,
                            self.candidates.len()
                        );
                    }
                    return Ok(token);
                }
                Err(e @ (Error::Auth { .. } | Error::Transport { .. })) => {
                    if i + 1 < self.candidates.len() {
                        warn!("Token exchange at {} failed: {}, trying next endpoint", endpoint, e);
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::InvalidConfig("no API endpoint configured".to_string())))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::InvalidConfig(format!("value is not a valid header: {value:?}")))
}

/// Parse `Retry-After` given in seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Unwrap the platform envelope and classify failures.
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    body: &str,
    retry_after: Option<Duration>,
) -> Result<T> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| Error::Protocol(format!("response is not a valid envelope: {e}")))?;

    if !envelope.success {
        return Err(classify_failure(envelope.code, envelope.msg, retry_after));
    }

    let result = envelope
        .result
        .ok_or_else(|| Error::Protocol("successful response without result".to_string()))?;

    serde_json::from_value(result)
        .map_err(|e| Error::Protocol(format!("unexpected result shape: {e}")))
}

fn classify_failure(code: Option<i64>, msg: Option<String>, retry_after: Option<Duration>) -> Error {
    let message = msg.unwrap_or_else(|| "no message".to_string());

    if let Some(c) = code {
        if AUTH_CODES.contains(&c) {
            return Error::Auth { code, message };
        }
        if DEVICE_UNAVAILABLE_CODES.contains(&c) {
            return Error::DeviceOffline { code, message };
        }
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("frequency") || lower.contains("too many") || lower.contains("rate limit") {
        return Error::RateLimit {
            retry_after,
            message,
        };
    }

    Error::Protocol(match code {
        Some(c) => format!("platform error {c}: {message}"),
        None => format!("platform error: {message}"),
    })
}
