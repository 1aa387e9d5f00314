//! Core types for weather station telemetry.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Origin of a [`Reading`].
///
/// Every stored reading carries exactly one source tag; values from two
/// sources are never blended into one reading.
///
/// ```
/// use stationlog_types::Source;
///
/// assert_eq!(Source::PrimaryDevice.as_str(), "primary_device");
/// assert_eq!("secondary_climate".parse::<Source>(), Ok(Source::SecondaryClimate));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum Source {
    /// The weather station itself, read through the cloud device API.
    PrimaryDevice,
    /// A coordinate-keyed public climate service.
    SecondaryClimate,
    /// Rows loaded from files by an operator.
    ManualImport,
}

impl Source {
    /// All known sources, in fallback priority order.
    pub const ALL: [Source; 3] = [
        Source::PrimaryDevice,
        Source::SecondaryClimate,
        Source::ManualImport,
    ];

    /// Stable string tag used in storage and on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::PrimaryDevice => "primary_device",
            Source::SecondaryClimate => "secondary_climate",
            Source::ManualImport => "manual_import",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary_device" => Ok(Source::PrimaryDevice),
            "secondary_climate" => Ok(Source::SecondaryClimate),
            "manual_import" => Ok(Source::ManualImport),
            other => Err(ParseError::UnknownSource(other.to_string())),
        }
    }
}

/// A single normalized weather observation.
///
/// Units: temperature in °C, humidity in %RH, pressure in hPa, wind speed in
/// m/s, wind direction in degrees (0-360), UV as a dimensionless index.
/// Any measurement may be absent, but at least one must be present for the
/// reading to be storable (see [`Reading::validate`]).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Instant of the observation (UTC).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Where the observation came from.
    pub source: Source,
    /// Air temperature in degrees Celsius.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub temperature: Option<f64>,
    /// Relative humidity percentage.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub humidity: Option<f64>,
    /// Atmospheric pressure in hPa.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub pressure: Option<f64>,
    /// Wind speed in m/s.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub wind_speed: Option<f64>,
    /// Wind direction in degrees.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub wind_direction: Option<f64>,
    /// UV index.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub uv_index: Option<f64>,
}

impl Reading {
    /// Create an empty reading for the given instant and source.
    ///
    /// The result does not validate until at least one measurement is set.
    #[must_use]
    pub fn new(timestamp: OffsetDateTime, source: Source) -> Self {
        Self {
            timestamp,
            source,
            temperature: None,
            humidity: None,
            pressure: None,
            wind_speed: None,
            wind_direction: None,
            uv_index: None,
        }
    }

    /// Create a builder for constructing a `Reading` field by field.
    pub fn builder(timestamp: OffsetDateTime, source: Source) -> ReadingBuilder {
        ReadingBuilder {
            reading: Self::new(timestamp, source),
        }
    }

    /// Whole-minute bucket used as the deduplication key.
    ///
    /// ```
    /// use stationlog_types::{Reading, Source};
    /// use time::OffsetDateTime;
    ///
    /// let a = Reading::new(OffsetDateTime::from_unix_timestamp(120).unwrap(), Source::PrimaryDevice);
    /// let b = Reading::new(OffsetDateTime::from_unix_timestamp(179).unwrap(), Source::PrimaryDevice);
    /// assert_eq!(a.minute_bucket(), b.minute_bucket());
    /// ```
    #[must_use]
    pub fn minute_bucket(&self) -> i64 {
        self.timestamp.unix_timestamp().div_euclid(60)
    }

    /// Number of populated measurement fields.
    #[must_use]
    pub fn measurement_count(&self) -> usize {
        self.measurements().filter(|(_, v)| v.is_some()).count()
    }

    fn measurements(&self) -> impl Iterator<Item = (&'static str, Option<f64>)> {
        [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("pressure", self.pressure),
            ("wind_speed", self.wind_speed),
            ("wind_direction", self.wind_direction),
            ("uv_index", self.uv_index),
        ]
        .into_iter()
    }

    /// Check that the reading is storable.
    ///
    /// Validates:
    /// - at least one measurement is present
    /// - every present measurement is finite
    /// - `humidity` is 0-100
    /// - `wind_direction` is 0-360
    /// - `wind_speed` and `uv_index` are not negative
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::EmptyReading`] or [`ParseError::InvalidValue`].
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.measurement_count() == 0 {
            return Err(ParseError::EmptyReading);
        }

        for (name, value) in self.measurements() {
            if let Some(v) = value
                && !v.is_finite()
            {
                return Err(ParseError::InvalidValue(format!("{name} is not finite")));
            }
        }

        if let Some(h) = self.humidity
            && !(0.0..=100.0).contains(&h)
        {
            return Err(ParseError::InvalidValue(format!(
                "humidity {h} is outside valid range (0-100%)"
            )));
        }

        if let Some(d) = self.wind_direction
            && !(0.0..=360.0).contains(&d)
        {
            return Err(ParseError::InvalidValue(format!(
                "wind direction {d} is outside valid range (0-360°)"
            )));
        }

        if let Some(s) = self.wind_speed
            && s < 0.0
        {
            return Err(ParseError::InvalidValue(format!(
                "wind speed {s} is negative"
            )));
        }

        if let Some(uv) = self.uv_index
            && uv < 0.0
        {
            return Err(ParseError::InvalidValue(format!("UV index {uv} is negative")));
        }

        Ok(())
    }
}

/// Builder for [`Reading`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ReadingBuilder {
    reading: Reading,
}

impl ReadingBuilder {
    /// Set temperature (°C).
    pub fn temperature(mut self, value: f64) -> Self {
        self.reading.temperature = Some(value);
        self
    }

    /// Set relative humidity (%).
    pub fn humidity(mut self, value: f64) -> Self {
        self.reading.humidity = Some(value);
        self
    }

    /// Set pressure (hPa).
    pub fn pressure(mut self, value: f64) -> Self {
        self.reading.pressure = Some(value);
        self
    }

    /// Set wind speed (m/s).
    pub fn wind_speed(mut self, value: f64) -> Self {
        self.reading.wind_speed = Some(value);
        self
    }

    /// Set wind direction (degrees).
    pub fn wind_direction(mut self, value: f64) -> Self {
        self.reading.wind_direction = Some(value);
        self
    }

    /// Set UV index.
    pub fn uv_index(mut self, value: f64) -> Self {
        self.reading.uv_index = Some(value);
        self
    }

    /// Build the `Reading` without validation.
    #[must_use]
    pub fn build(self) -> Reading {
        self.reading
    }

    /// Build the `Reading`, running [`Reading::validate`].
    ///
    /// # Errors
    ///
    /// Returns the validation error if the reading is not storable.
    pub fn try_build(self) -> Result<Reading, ParseError> {
        self.reading.validate()?;
        Ok(self.reading)
    }
}

/// Coarse classification of a collection failure.
///
/// Used in cycle results, logs and metrics labels so that consumers do not
/// have to depend on the full error types of the network and storage crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum ErrorKind {
    /// Credentials or token rejected.
    Auth,
    /// The station is offline or not reachable through the platform.
    DeviceOffline,
    /// The platform asked us to slow down.
    RateLimit,
    /// Network failure or timeout.
    Transport,
    /// Unexpected response shape.
    Protocol,
    /// Every source failed.
    Aggregate,
    /// Persisting the reading failed.
    Store,
    /// The cycle was interrupted by shutdown.
    Cancelled,
}

impl ErrorKind {
    /// Stable string tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::DeviceOffline => "device_offline",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Aggregate => "aggregate",
            ErrorKind::Store => "store",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(ErrorKind::Auth),
            "device_offline" => Ok(ErrorKind::DeviceOffline),
            "rate_limit" => Ok(ErrorKind::RateLimit),
            "transport" => Ok(ErrorKind::Transport),
            "protocol" => Ok(ErrorKind::Protocol),
            "aggregate" => Ok(ErrorKind::Aggregate),
            "store" => Ok(ErrorKind::Store),
            "cancelled" => Ok(ErrorKind::Cancelled),
            other => Err(ParseError::UnknownErrorKind(other.to_string())),
        }
    }
}

/// Outcome of one scheduled collection cycle.
///
/// Transient: logged, kept in a bounded in-memory history and folded into
/// daily counters, never stored row by row.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollectionCycleResult {
    /// When the cycle started.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub attempted_at: OffsetDateTime,
    /// When the cycle finished.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub finished_at: OffsetDateTime,
    /// Whether a reading was obtained and persisted (or already present).
    pub succeeded: bool,
    /// Source of the reading, on success.
    pub source_used: Option<Source>,
    /// Failure classification, on failure.
    pub error_kind: Option<ErrorKind>,
    /// Human-readable failure message, on failure.
    pub error_message: Option<String>,
    /// Number of sub-attempts made within the cycle.
    pub attempts: u32,
    /// True when the reading was already stored for that minute and source.
    pub duplicate: bool,
}

impl CollectionCycleResult {
    /// Result for a cycle that stored (or deduplicated) a reading.
    #[must_use]
    pub fn success(
        attempted_at: OffsetDateTime,
        source: Source,
        attempts: u32,
        duplicate: bool,
    ) -> Self {
        Self {
            attempted_at,
            finished_at: OffsetDateTime::now_utc(),
            succeeded: true,
            source_used: Some(source),
            error_kind: None,
            error_message: None,
            attempts,
            duplicate,
        }
    }

    /// Result for a cycle that ended without a stored reading.
    #[must_use]
    pub fn failure(
        attempted_at: OffsetDateTime,
        kind: ErrorKind,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            attempted_at,
            finished_at: OffsetDateTime::now_utc(),
            succeeded: false,
            source_used: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            attempts,
            duplicate: false,
        }
    }

    /// Wall-clock duration of the cycle.
    #[must_use]
    pub fn duration(&self) -> time::Duration {
        self.finished_at - self.attempted_at
    }
}
