//! Error types for data validation in stationlog-types.

use thiserror::Error;

/// Errors that can occur when building or parsing station data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A reading carried no measurement at all.
    #[error("Reading has no measurements")]
    EmptyReading,

    /// A measurement was outside its physical range or not finite.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Unknown source tag.
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Unknown error kind tag.
    #[error("Unknown error kind: {0}")]
    UnknownErrorKind(String),
}

/// Result type alias using stationlog-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
