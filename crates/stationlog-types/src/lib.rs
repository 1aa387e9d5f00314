//! Platform-agnostic types for cloud weather station telemetry.
//!
//! This crate provides the data model shared by the cloud client
//! (stationlog-core), the persistence layer (stationlog-store) and the
//! collector service (stationlog-service).
//!
//! # Features
//!
//! - Normalized [`Reading`] with optional measurements and a [`Source`] tag
//! - [`Credential`] with a redacting `Debug`
//! - [`CollectionCycleResult`] and [`ErrorKind`] for cycle bookkeeping
//!
//! # Example
//!
//! ```
//! use stationlog_types::{Reading, Source};
//! use time::OffsetDateTime;
//!
//! let reading = Reading::builder(OffsetDateTime::now_utc(), Source::PrimaryDevice)
//!     .temperature(21.4)
//!     .humidity(63.0)
//!     .try_build()?;
//! assert_eq!(reading.measurement_count(), 2);
//! # Ok::<(), stationlog_types::ParseError>(())
//! ```

pub mod credential;
pub mod error;
pub mod types;

pub use credential::Credential;
pub use error::{ParseError, ParseResult};
pub use types::{CollectionCycleResult, ErrorKind, Reading, ReadingBuilder, Source};

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    // --- Source tests ---

    #[test]
    fn test_source_string_tags_round_trip() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
            assert_eq!(source.to_string(), source.as_str());
        }
    }

    #[test]
    fn test_source_unknown_tag() {
        let err = "meteostat".parse::<Source>().unwrap_err();
        assert_eq!(err, ParseError::UnknownSource("meteostat".to_string()));
    }

    #[test]
    fn test_source_serde_uses_snake_case() {
        let json = serde_json::to_string(&Source::SecondaryClimate).unwrap();
        assert_eq!(json, "\"secondary_climate\"");
    }

    // --- Reading tests ---

    #[test]
    fn test_empty_reading_is_rejected() {
        let reading = Reading::new(at(0), Source::PrimaryDevice);
        assert_eq!(reading.validate(), Err(ParseError::EmptyReading));
    }

    #[test]
    fn test_partial_reading_is_valid() {
        let reading = Reading::builder(at(0), Source::SecondaryClimate)
            .pressure(1009.3)
            .build();
        assert!(reading.validate().is_ok());
        assert_eq!(reading.measurement_count(), 1);
    }

    #[test]
    fn test_reading_rejects_out_of_range_values() {
        let humid = Reading::builder(at(0), Source::PrimaryDevice)
            .humidity(104.0)
            .try_build();
        assert!(matches!(humid, Err(ParseError::InvalidValue(msg)) if msg.contains("humidity")));

        let wind = Reading::builder(at(0), Source::PrimaryDevice)
            .wind_direction(400.0)
            .try_build();
        assert!(wind.is_err());

        let nan = Reading::builder(at(0), Source::PrimaryDevice)
            .temperature(f64::NAN)
            .try_build();
        assert!(matches!(nan, Err(ParseError::InvalidValue(msg)) if msg.contains("finite")));
    }

    #[test]
    fn test_minute_bucket_absorbs_seconds() {
        let a = Reading::new(at(1_753_354_560), Source::PrimaryDevice);
        let b = Reading::new(at(1_753_354_619), Source::PrimaryDevice);
        let c = Reading::new(at(1_753_354_620), Source::PrimaryDevice);
        assert_eq!(a.minute_bucket(), b.minute_bucket());
        assert_ne!(b.minute_bucket(), c.minute_bucket());
    }

    #[test]
    fn test_minute_bucket_before_epoch_floors() {
        let reading = Reading::new(at(-1), Source::ManualImport);
        assert_eq!(reading.minute_bucket(), -1);
    }

    #[test]
    fn test_reading_serde_skips_missing_fields() {
        let reading = Reading::builder(at(1_753_354_610), Source::PrimaryDevice)
            .temperature(24.1)
            .build();
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["source"], "primary_device");
        assert_eq!(json["temperature"], 24.1);
        assert!(json.get("uv_index").is_none());

        let back: Reading = serde_json::from_value(json).unwrap();
        assert_eq!(back, reading);
    }

    // --- Credential tests ---

    #[test]
    fn test_credential_trims_endpoint() {
        let cred = Credential::new("id", "secret", "dev", "https://openapi.tuyaeu.com/");
        assert_eq!(cred.region_endpoint(), "https://openapi.tuyaeu.com");
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = Credential::new("id", "s3cr3t-value", "dev", "https://example.com");
        let debug = format!("{:?}", cred);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("s3cr3t-value"));
    }

    // --- Cycle result tests ---

    #[test]
    fn test_cycle_result_constructors() {
        let ok = CollectionCycleResult::success(at(0), Source::PrimaryDevice, 1, false);
        assert!(ok.succeeded);
        assert_eq!(ok.source_used, Some(Source::PrimaryDevice));
        assert!(ok.error_kind.is_none());

        let failed = CollectionCycleResult::failure(at(0), ErrorKind::Transport, "timed out", 3);
        assert!(!failed.succeeded);
        assert_eq!(failed.error_kind, Some(ErrorKind::Transport));
        assert_eq!(failed.attempts, 3);
    }

    #[test]
    fn test_error_kind_tags_round_trip() {
        for kind in [
            ErrorKind::Auth,
            ErrorKind::DeviceOffline,
            ErrorKind::RateLimit,
            ErrorKind::Transport,
            ErrorKind::Protocol,
            ErrorKind::Aggregate,
            ErrorKind::Store,
            ErrorKind::Cancelled,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn minute_bucket_contains_timestamp(secs in -10_000_000_000i64..10_000_000_000i64) {
                let reading = Reading::new(at(secs), Source::PrimaryDevice);
                let bucket = reading.minute_bucket();
                prop_assert!(bucket * 60 <= secs);
                prop_assert!(secs < (bucket + 1) * 60);
            }

            #[test]
            fn humidity_in_range_validates(h in 0.0f64..=100.0) {
                let reading = Reading::builder(at(0), Source::PrimaryDevice).humidity(h).build();
                prop_assert!(reading.validate().is_ok());
            }
        }
    }
}
