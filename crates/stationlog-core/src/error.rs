//! Error types for stationlog-core.
//!
//! Every call into the cloud platform or the secondary climate service is a
//! single attempt. Errors are classified so that the caller (the collector)
//! can decide whether to fall back to another source, back off, or give up.
//!
//! # Classification
//!
//! | Error | Falls back to next source | Retried by the collector | Typical cause |
//! |-------|---------------------------|--------------------------|---------------|
//! | [`Error::Auth`] | yes | yes (token is refreshed) | sign invalid, token expired |
//! | [`Error::DeviceOffline`] | yes | yes | station lost Wi-Fi, permission revoked |
//! | [`Error::RateLimit`] | yes | yes, after the hint | too many requests |
//! | [`Error::Transport`] | yes | yes | DNS, TLS, timeout, HTTP 5xx |
//! | [`Error::Protocol`] | no | no | unexpected response shape |
//! | [`Error::Aggregate`] | n/a | if the first attempt is retryable | every source failed |
//! | [`Error::InvalidConfig`] | no | no | fix configuration and restart |
//!
//! Auth errors from a business call also invalidate the cached token, see
//! [`crate::ApiClient`].

use std::fmt;
use std::time::Duration;

use stationlog_types::{ErrorKind, Source};
use thiserror::Error;

/// Errors raised by the cloud client and reading sources.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The platform rejected the credentials, signature or token.
    #[error("Authentication failed: {message}{}", format_code(.code))]
    Auth {
        /// Platform error code, if one was returned.
        code: Option<i64>,
        /// Platform error message.
        message: String,
    },

    /// The station is offline or not accessible to this project.
    #[error("Device offline: {message}{}", format_code(.code))]
    DeviceOffline {
        /// Platform error code, if one was returned.
        code: Option<i64>,
        /// Platform error message.
        message: String,
    },

    /// The upstream asked us to slow down.
    #[error("Rate limited: {message}")]
    RateLimit {
        /// How long the upstream asked us to wait, when it said so.
        retry_after: Option<Duration>,
        /// Upstream message.
        message: String,
    },

    /// Network failure, timeout, or an HTTP status outside the protocol.
    #[error("Transport error during {operation}: {message}")]
    Transport {
        /// The operation that failed.
        operation: String,
        /// What went wrong.
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Every configured source failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn format_code(code: &Option<i64>) -> String {
    code.map(|c| format!(" (code {c})")).unwrap_or_default()
}

impl Error {
    /// Build a transport error from a reqwest failure.
    pub fn transport(operation: &str, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        Error::Transport {
            operation: operation.to_string(),
            message,
        }
    }

    /// Coarse classification for results, logs and metrics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth { .. } => ErrorKind::Auth,
            Error::DeviceOffline { .. } => ErrorKind::DeviceOffline,
            Error::RateLimit { .. } => ErrorKind::RateLimit,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Protocol(_) | Error::InvalidConfig(_) => ErrorKind::Protocol,
            Error::Aggregate(_) => ErrorKind::Aggregate,
        }
    }

    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Auth { .. }
            | Error::DeviceOffline { .. }
            | Error::RateLimit { .. }
            | Error::Transport { .. } => true,
            Error::Protocol(_) | Error::InvalidConfig(_) => false,
            Error::Aggregate(agg) => agg.is_retryable(),
        }
    }

    /// Whether the aggregator should try the next source after this error.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Error::Auth { .. }
                | Error::DeviceOffline { .. }
                | Error::RateLimit { .. }
                | Error::Transport { .. }
        )
    }

    /// Upstream wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            Error::Aggregate(agg) => agg.retry_after(),
            _ => None,
        }
    }
}

/// Result type alias using stationlog-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// One failed source attempt inside an [`AggregateError`].
#[derive(Debug, Clone)]
pub struct SourceFailure {
    /// The source that was tried.
    pub source: Source,
    /// Why it failed.
    pub error: Error,
}

/// Every source attempted in a cycle failed.
///
/// Attempts are listed in the order they were made.
#[derive(Debug, Clone)]
pub struct AggregateError {
    /// Failed attempts, primary first.
    pub attempts: Vec<SourceFailure>,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "All sources failed")?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} -> {}", attempt.source, attempt.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl AggregateError {
    /// Create an aggregate error from the attempts made.
    pub fn new(attempts: Vec<SourceFailure>) -> Self {
        Self { attempts }
    }

    /// Retryable when the first (preferred) source failed for a transient
    /// reason. A broken fallback does not stop the preferred source from
    /// being tried again.
    pub fn is_retryable(&self) -> bool {
        self.attempts
            .first()
            .is_some_and(|a| a.error.is_retryable())
    }

    /// Largest rate-limit hint among the attempts.
    pub fn retry_after(&self) -> Option<Duration> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.retry_after())
            .max()
    }

    /// Classification of the first attempt's failure.
    pub fn primary_kind(&self) -> Option<ErrorKind> {
        self.attempts.first().map(|a| a.error.kind())
    }

    /// Kind recorded for a failed cycle.
    ///
    /// `Aggregate` only when two or more sources were tried; a chain that
    /// stopped at its first source reports that source's own kind.
    pub fn cycle_kind(&self) -> ErrorKind {
        match self.attempts.as_slice() {
            [only] => only.error.kind(),
            _ => ErrorKind::Aggregate,
        }
    }

    /// Sources that were tried, in order.
    pub fn sources(&self) -> Vec<Source> {
        self.attempts.iter().map(|a| a.source).collect()
    }
}
