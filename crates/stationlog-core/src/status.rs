//! Device status payloads and their normalization into [`Reading`]s.
//!
//! The platform reports a station's state as a list of data points
//! (`{code, value, time}`), with integer values scaled per code. Known codes:
//!
//! | Field | Codes (first match wins) | Scale |
//! |-------|--------------------------|-------|
//! | temperature | `temp_current_external`, `temp_current`, `va_temperature` | ÷10 |
//! | humidity | `humidity_outdoor`, `humidity_value`, `va_humidity` | ÷1 |
//! | pressure | `atmospheric_pressture` (÷100), `pressure` (÷1) | |
//! | wind speed | `windspeed_avg`, `wind_speed` | ÷10 |
//! | wind direction | `wind_direct`, `wind_direction` | ÷1 |
//! | UV index | `uv_index`, `uv` | ÷10 |
//!
//! `atmospheric_pressture` is spelled that way by the firmware.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stationlog_types::{Reading, Source};
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Default tolerance between device-reported time and request time.
pub const DEFAULT_CLOCK_DRIFT_TOLERANCE: Duration = Duration::from_secs(300);

/// One data point of a device status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPoint {
    /// Data point code, e.g. `temp_current`.
    pub code: String,
    /// Raw value; numbers for the codes we use.
    pub value: serde_json::Value,
    /// Device-reported time of the value, in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

/// A device status as returned by the platform, plus when it was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDeviceStatus {
    /// Device the status belongs to.
    pub device_id: String,
    /// Data points in platform order.
    pub points: Vec<StatusPoint>,
    /// When the status request was issued.
    pub requested_at: OffsetDateTime,
}

/// Device metadata from `GET /v1.0/devices/{id}` or the device list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Whether the platform currently sees the device online.
    #[serde(default)]
    pub online: bool,
    /// Product category code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Product name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// Device time zone, e.g. `+08:00`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    /// Last update, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<i64>,
    /// Current data points, when included.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<StatusPoint>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Temperature,
    Humidity,
    Pressure,
    WindSpeed,
    WindDirection,
    UvIndex,
}

/// Codes per field, in priority order, with their divisors.
const CODE_TABLE: &[(Field, &[(&str, f64)])] = &[
    (
        Field::Temperature,
        &[
            ("temp_current_external", 10.0),
            ("temp_current", 10.0),
            ("va_temperature", 10.0),
        ],
    ),
    (
        Field::Humidity,
        &[
            ("humidity_outdoor", 1.0),
            ("humidity_value", 1.0),
            ("va_humidity", 1.0),
        ],
    ),
    (
        Field::Pressure,
        &[("atmospheric_pressture", 100.0), ("pressure", 1.0)],
    ),
    (
        Field::WindSpeed,
        &[("windspeed_avg", 10.0), ("wind_speed", 10.0)],
    ),
    (
        Field::WindDirection,
        &[("wind_direct", 1.0), ("wind_direction", 1.0)],
    ),
    (Field::UvIndex, &[("uv_index", 10.0), ("uv", 10.0)]),
];

/// A normalized status.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStatus {
    /// The reading, keyed on the chosen timestamp.
    pub reading: Reading,
    /// Latest time reported by the device, if any.
    pub device_time: Option<OffsetDateTime>,
    /// True when the device time was discarded for disagreeing with the
    /// request time by more than the tolerance.
    pub clock_drift: bool,
}

impl RawDeviceStatus {
    fn numeric(&self, code: &str) -> Option<f64> {
        let point = self.points.iter().find(|p| p.code == code)?;
        match &point.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Latest device-reported time across all points.
    pub fn device_time(&self) -> Option<OffsetDateTime> {
        let ms = self.points.iter().filter_map(|p| p.time).max()?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
    }

    /// Map known codes into a [`Reading`] tagged [`Source::PrimaryDevice`].
    ///
    /// The device-reported time is used when it lies within `drift_tolerance`
    /// of the request time; otherwise the request time is authoritative and
    /// the result is flagged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if no known numeric code is present or a
    /// value is out of range.
    pub fn normalize(&self, drift_tolerance: Duration) -> Result<NormalizedStatus> {
        let device_time = self.device_time();
        let (timestamp, clock_drift) = match device_time {
            Some(t) => {
                let drift = (t - self.requested_at).abs();
                if drift > drift_tolerance {
                    (self.requested_at, true)
                } else {
                    (t, false)
                }
            }
            None => (self.requested_at, false),
        };

        let mut reading = Reading::new(timestamp, Source::PrimaryDevice);
        for (field, codes) in CODE_TABLE {
            let value = codes
                .iter()
                .find_map(|(code, divisor)| self.numeric(code).map(|v| v / divisor));
            let slot = match field {
                Field::Temperature => &mut reading.temperature,
                Field::Humidity => &mut reading.humidity,
                Field::Pressure => &mut reading.pressure,
                Field::WindSpeed => &mut reading.wind_speed,
                Field::WindDirection => &mut reading.wind_direction,
                Field::UvIndex => &mut reading.uv_index,
            };
            *slot = value;
        }

        reading.validate().map_err(|e| {
            Error::Protocol(format!(
                "device {} status could not be normalized: {e}",
                self.device_id
            ))
        })?;

        Ok(NormalizedStatus {
            reading,
            device_time,
            clock_drift,
        })
    }
}
