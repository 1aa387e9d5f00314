//! Request signing for the cloud device API.
//!
//! Every request carries an HMAC-SHA256 signature over a canonical
//! string-to-sign:
//!
//! ```text
//! string_to_sign = METHOD "\n" hex(sha256(body)) "\n" "" "\n" path_with_query
//! message        = access_id [access_token] timestamp_ms string_to_sign
//! sign           = UPPERCASE_HEX(HMAC-SHA256(access_secret, message))
//! ```
//!
//! The access token segment is only present for business requests made while
//! a token is held. The empty third line is the (unused) signed-headers block.
//!
//! All functions here are pure.

use ring::hmac;
use sha2::{Digest, Sha256};
use stationlog_types::Credential;

/// Value of the `sign_method` header.
pub const SIGN_METHOD: &str = "HMAC-SHA256";

/// Header names used by the platform.
pub mod headers {
    /// Access id header.
    pub const CLIENT_ID: &str = "client_id";
    /// Signature header.
    pub const SIGN: &str = "sign";
    /// Signature algorithm header.
    pub const SIGN_METHOD: &str = "sign_method";
    /// Millisecond timestamp header.
    pub const TIMESTAMP: &str = "t";
    /// Access token header, present once a token is held.
    pub const ACCESS_TOKEN: &str = "access_token";
}

/// Lowercase hex SHA-256 of a request body. An empty body hashes the empty
/// string.
///
/// ```
/// assert_eq!(
///     stationlog_core::sign::content_hash(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
pub fn content_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Build the canonical string-to-sign.
pub fn string_to_sign(method: &str, body_hash: &str, path_with_query: &str) -> String {
    format!(
        "{}\n{}\n\n{}",
        method.to_ascii_uppercase(),
        body_hash,
        path_with_query
    )
}

/// Everything that goes into one signature.
#[derive(Debug, Clone, Copy)]
pub struct SigningInput<'a> {
    /// HTTP method, e.g. `GET`.
    pub method: &'a str,
    /// Path including the query string, e.g. `/v1.0/token?grant_type=1`.
    pub path_with_query: &'a str,
    /// Output of [`content_hash`] for the request body.
    pub body_hash: &'a str,
    /// Milliseconds since the Unix epoch, sent as the `t` header.
    pub timestamp_ms: i64,
    /// Access token, for business requests.
    pub access_token: Option<&'a str>,
}

/// Compute the uppercase hex signature for a request.
///
/// Deterministic: the same input and credential always yield the same
/// signature.
pub fn sign(input: &SigningInput<'_>, credential: &Credential) -> String {
    let mut message = String::with_capacity(256);
    message.push_str(credential.access_id());
    if let Some(token) = input.access_token {
        message.push_str(token);
    }
    message.push_str(&input.timestamp_ms.to_string());
    message.push_str(&string_to_sign(
        input.method,
        input.body_hash,
        input.path_with_query,
    ));

    let key = hmac::Key::new(hmac::HMAC_SHA256, credential.access_secret().as_bytes());
    let tag = hmac::sign(&key, message.as_bytes());
    hex::encode_upper(tag.as_ref())
}
