//! Access token caching.
//!
//! The platform issues short-lived access tokens through a signed exchange.
//! [`TokenCache`] owns the current token and hands out clones while it is
//! fresh. A single async mutex is held across a refresh so that concurrent
//! callers never race to exchange credentials.
//!
//! The cache never retries: a failed exchange is returned to the caller.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;

/// Default safety margin before expiry at which a token is refreshed.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// A platform access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    /// Token value sent in the `access_token` header.
    pub value: String,
    /// Instant after which the platform rejects the token.
    pub expires_at: OffsetDateTime,
    /// Platform user id bound to the token (used for the device list).
    pub uid: Option<String>,
    /// Refresh token, when the platform returned one.
    pub refresh_token: Option<String>,
    /// Regional endpoint that issued the token.
    pub endpoint: String,
}

impl Token {
    /// Whether the token can still be used at `now`, leaving `margin` spare.
    pub fn is_fresh(&self, now: OffsetDateTime, margin: Duration) -> bool {
        now + margin < self.expires_at
    }

    /// Short, log-safe prefix of the token value.
    pub fn redacted(&self) -> String {
        let prefix: String = self.value.chars().take(6).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &self.redacted())
            .field("expires_at", &self.expires_at)
            .field("uid", &self.uid)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Something that can trade credentials for a new [`Token`].
///
/// Implemented by [`crate::CloudTransport`]; tests substitute counting fakes.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Perform one signed credential exchange.
    async fn exchange(&self) -> Result<Token>;
}

/// Single-writer cache for the current access token.
pub struct TokenCache {
    exchanger: Arc<dyn TokenExchange>,
    safety_margin: Duration,
    current: Mutex<Option<Token>>,
    exchanges: AtomicU64,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("safety_margin", &self.safety_margin)
            .field("exchanges", &self.exchange_count())
            .finish()
    }
}

impl TokenCache {
    /// Create an empty cache with the default safety margin.
    pub fn new(exchanger: Arc<dyn TokenExchange>) -> Self {
        Self::with_safety_margin(exchanger, DEFAULT_SAFETY_MARGIN)
    }

    /// Create an empty cache that refreshes `margin` before expiry.
    pub fn with_safety_margin(exchanger: Arc<dyn TokenExchange>, margin: Duration) -> Self {
        Self {
            exchanger,
            safety_margin: margin,
            current: Mutex::new(None),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Return the cached token if it is fresh, otherwise exchange
    /// credentials for a new one.
    ///
    /// # Errors
    ///
    /// Returns whatever the exchange returned, typically
    /// [`Error::Auth`](crate::Error::Auth) or
    /// [`Error::Transport`](crate::Error::Transport).
    pub async fn get_valid_token(&self) -> Result<Token> {
        let mut current = self.current.lock().await;

        if let Some(token) = current.as_ref()
            && token.is_fresh(OffsetDateTime::now_utc(), self.safety_margin)
        {
            return Ok(token.clone());
        }

        debug!("Access token missing or near expiry, exchanging credentials");
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        let token = self.exchanger.exchange().await?;
        info!(
            "Obtained access token {} from {}, expires at {}",
            token.redacted(),
            token.endpoint,
            token.expires_at
        );
        *current = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        let mut current = self.current.lock().await;
        if current.take().is_some() {
            debug!("Access token invalidated");
        }
    }

    /// Drop the cached token only if it is still `value`.
    ///
    /// A token refreshed by another caller in the meantime is kept.
    pub async fn invalidate_if(&self, value: &str) {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|t| t.value == value) {
            *current = None;
            debug!("Access token invalidated after rejection");
        }
    }

    /// Token currently held, if any.
    pub async fn peek(&self) -> Option<Token> {
        self.current.lock().await.clone()
    }

    /// Number of credential exchanges attempted so far.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }
}
