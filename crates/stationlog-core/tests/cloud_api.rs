//! Integration tests for the cloud client against a local mock server.
//!
//! Run with:
//! `cargo test --package stationlog-core --test cloud_api`

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use stationlog_core::{
    ApiClient, ApiClientOptions, ClimateClient, ClimateOptions, ClientMetrics, Error,
    FallbackAggregator, ReadingSource, TransportOptions,
};
use stationlog_types::{Credential, Source};
use time::OffsetDateTime;

const ACCESS_ID: &str = "fxtdf9uy9uef3qv9nege";
const ACCESS_SECRET: &str = "cd4f9e2a7b8c41d0a6e35f1b2c9d8e7a";
const DEVICE_ID: &str = "bf5f5736feb7d67046gdkw";

fn credential(endpoint: &str) -> Arc<Credential> {
    Arc::new(Credential::new(ACCESS_ID, ACCESS_SECRET, DEVICE_ID, endpoint))
}

fn token_body(token: &str) -> String {
    json!({
        "success": true,
        "t": 1_753_354_610_112_i64,
        "result": {
            "access_token": token,
            "expire_time": 7200,
            "refresh_token": "r-1",
            "uid": "ay1622097934070h5Mpi"
        }
    })
    .to_string()
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn status_body(time_ms: i64) -> String {
    json!({
        "success": true,
        "t": time_ms,
        "result": [
            {"code": "temp_current_external", "value": 187, "time": time_ms},
            {"code": "humidity_outdoor", "value": 63, "time": time_ms},
            {"code": "atmospheric_pressture", "value": 101_325, "time": time_ms},
            {"code": "windspeed_avg", "value": 34, "time": time_ms},
            {"code": "wind_direct", "value": 270, "time": time_ms},
            {"code": "uv_index", "value": 52, "time": time_ms}
        ]
    })
    .to_string()
}

fn failure_body(code: i64, msg: &str) -> String {
    json!({"success": false, "code": code, "msg": msg, "t": now_ms()}).to_string()
}

fn token_path() -> Matcher {
    Matcher::Regex(r"^/v1\.0/token".to_string())
}

fn status_path() -> Matcher {
    Matcher::Regex(format!(r"^/v1\.0/devices/{DEVICE_ID}/status"))
}

async fn mock_token(server: &mut ServerGuard, token: &str, hits: usize) -> mockito::Mock {
    server
        .mock("GET", token_path())
        .match_header("client_id", ACCESS_ID)
        .match_header("sign_method", "HMAC-SHA256")
        .match_header("access_token", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body(token))
        .expect(hits)
        .create_async()
        .await
}

fn client(server: &ServerGuard) -> ApiClient {
    ApiClient::new(credential(&server.url()), ApiClientOptions::default()).unwrap()
}

#[tokio::test]
async fn test_token_is_reused_across_calls() {
    let mut server = Server::new_async().await;
    let token = mock_token(&mut server, "tok-1", 1).await;
    let status = server
        .mock("GET", status_path())
        .match_header("access_token", "tok-1")
        .match_header("client_id", ACCESS_ID)
        .with_status(200)
        .with_body(status_body(now_ms()))
        .expect(2)
        .create_async()
        .await;

    let client = client(&server);
    let first = client.fetch_reading().await.unwrap();
    let second = client.fetch_reading().await.unwrap();

    token.assert_async().await;
    status.assert_async().await;
    assert_eq!(first.source, Source::PrimaryDevice);
    assert_eq!(first.temperature, Some(18.7));
    assert_eq!(first.pressure, Some(1013.25));
    assert_eq!(second.wind_direction, Some(270.0));
    assert_eq!(client.tokens().exchange_count(), 1);

    let snapshot = client.metrics().snapshot();
    assert_eq!(snapshot.token_exchange.count, 1);
    assert_eq!(snapshot.device_status.success_count, 2);
}

#[tokio::test]
async fn test_auth_error_forces_fresh_exchange() {
    let mut server = Server::new_async().await;
    let token = mock_token(&mut server, "tok-1", 2).await;
    let status = server
        .mock("GET", status_path())
        .with_status(200)
        .with_body(failure_body(1010, "token invalid"))
        .expect(2)
        .create_async()
        .await;

    let client = client(&server);
    let err = client.fetch_reading().await.unwrap_err();
    assert!(matches!(err, Error::Auth { code: Some(1010), .. }));
    assert!(client.tokens().peek().await.is_none());

    let err = client.fetch_reading().await.unwrap_err();
    assert!(matches!(err, Error::Auth { .. }));

    token.assert_async().await;
    status.assert_async().await;
    assert_eq!(client.tokens().exchange_count(), 2);
}

#[tokio::test]
async fn test_token_exchange_falls_back_to_next_endpoint() {
    let mut primary = Server::new_async().await;
    let broken = primary
        .mock("GET", token_path())
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let mut secondary = Server::new_async().await;
    let token = mock_token(&mut secondary, "tok-eu", 1).await;
    let status = secondary
        .mock("GET", status_path())
        .match_header("access_token", "tok-eu")
        .with_status(200)
        .with_body(status_body(now_ms()))
        .expect(1)
        .create_async()
        .await;

    let options = ApiClientOptions {
        transport: TransportOptions {
            fallback_endpoints: vec![secondary.url(), primary.url()],
            ..TransportOptions::default()
        },
        ..ApiClientOptions::default()
    };
    let client = ApiClient::new(credential(&primary.url()), options).unwrap();

    client.fetch_reading().await.unwrap();

    broken.assert_async().await;
    token.assert_async().await;
    status.assert_async().await;
    let issued = client.tokens().peek().await.unwrap();
    assert_eq!(issued.endpoint, secondary.url());
}

#[tokio::test]
async fn test_device_offline_is_classified() {
    let mut server = Server::new_async().await;
    let _token = mock_token(&mut server, "tok-1", 1).await;
    let _status = server
        .mock("GET", status_path())
        .with_status(200)
        .with_body(failure_body(2001, "device is offline"))
        .create_async()
        .await;

    let err = client(&server).fetch_reading().await.unwrap_err();
    assert!(matches!(err, Error::DeviceOffline { code: Some(2001), .. }));
    assert!(err.triggers_fallback());
}

#[tokio::test]
async fn test_http_429_is_rate_limit_with_hint() {
    let mut server = Server::new_async().await;
    let _token = mock_token(&mut server, "tok-1", 1).await;
    let _status = server
        .mock("GET", status_path())
        .with_status(429)
        .with_header("retry-after", "120")
        .create_async()
        .await;

    let err = client(&server).fetch_reading().await.unwrap_err();
    assert!(matches!(err, Error::RateLimit { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
}

#[tokio::test]
async fn test_frequency_message_is_rate_limit() {
    let mut server = Server::new_async().await;
    let _token = mock_token(&mut server, "tok-1", 1).await;
    let _status = server
        .mock("GET", status_path())
        .with_status(200)
        .with_body(failure_body(40000901, "request frequency is too high"))
        .create_async()
        .await;

    let err = client(&server).fetch_reading().await.unwrap_err();
    assert!(matches!(err, Error::RateLimit { retry_after: None, .. }));
}

#[tokio::test]
async fn test_missing_result_is_protocol_error() {
    let mut server = Server::new_async().await;
    let _token = mock_token(&mut server, "tok-1", 1).await;
    let _status = server
        .mock("GET", status_path())
        .with_status(200)
        .with_body(r#"{"success":true,"t":1753354610112}"#)
        .create_async()
        .await;

    let err = client(&server).fetch_reading().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert!(!err.triggers_fallback());
}

#[tokio::test]
async fn test_drifted_device_clock_is_flagged() {
    let mut server = Server::new_async().await;
    let _token = mock_token(&mut server, "tok-1", 1).await;
    let stale_ms = now_ms() - 6 * 3_600_000;
    let _status = server
        .mock("GET", status_path())
        .with_status(200)
        .with_body(status_body(stale_ms))
        .create_async()
        .await;

    let client = client(&server);
    let before = OffsetDateTime::now_utc();
    let reading = client.fetch_reading().await.unwrap();

    assert!(reading.timestamp >= before - Duration::from_secs(1));
    assert_eq!(client.metrics().snapshot().clock_drift_flags, 1);
}

#[tokio::test]
async fn test_timeout_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // accept and hold connections without answering
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let options = ApiClientOptions {
        transport: TransportOptions {
            request_timeout: Duration::from_millis(200),
            ..TransportOptions::default()
        },
        ..ApiClientOptions::default()
    };
    let client = ApiClient::new(credential(&format!("http://{addr}")), options).unwrap();

    let err = client.fetch_reading().await.unwrap_err();
    assert!(
        matches!(&err, Error::Transport { message, .. } if message.contains("timed out")),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = ApiClient::new(
        credential(&format!("http://{addr}")),
        ApiClientOptions::default(),
    )
    .unwrap();

    let err = client.fetch_reading().await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_list_devices_uses_token_uid() {
    let mut server = Server::new_async().await;
    let _token = mock_token(&mut server, "tok-1", 1).await;
    let devices = server
        .mock(
            "GET",
            Matcher::Regex(r"^/v1\.0/users/ay1622097934070h5Mpi/devices".to_string()),
        )
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "result": [{"id": DEVICE_ID, "name": "Garden station", "online": false, "category": "qxj"}]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let listed = client(&server).list_devices().await.unwrap();
    devices.assert_async().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, DEVICE_ID);
    assert!(!listed[0].online);
}

#[tokio::test]
async fn test_climate_rate_limit() {
    let mut server = Server::new_async().await;
    let _forecast = server
        .mock("GET", Matcher::Regex(r"^/v1/forecast".to_string()))
        .with_status(429)
        .with_header("retry-after", "30")
        .create_async()
        .await;

    let climate = ClimateClient::new(
        ClimateOptions {
            base_url: server.url(),
            ..ClimateOptions::new(52.52, 13.41)
        },
        Arc::new(ClientMetrics::new()),
    )
    .unwrap();
    let err = climate.fetch().await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
}

#[tokio::test]
async fn test_primary_transport_failures_fall_back_every_cycle() {
    let mut cloud = Server::new_async().await;
    let _token = mock_token(&mut cloud, "tok-1", 1).await;
    let status = cloud
        .mock("GET", status_path())
        .with_status(502)
        .expect(3)
        .create_async()
        .await;

    let mut climate_server = Server::new_async().await;
    let forecast = climate_server
        .mock("GET", Matcher::Regex(r"^/v1/forecast".to_string()))
        .with_status(200)
        .with_body(
            json!({
                "latitude": 52.52,
                "longitude": 13.41,
                "current": {
                    "time": OffsetDateTime::now_utc().unix_timestamp(),
                    "interval": 900,
                    "temperature_2m": 17.9,
                    "relative_humidity_2m": 71,
                    "surface_pressure": 1004.2,
                    "wind_speed_10m": 4.1,
                    "wind_direction_10m": 225,
                    "uv_index": 1.2
                }
            })
            .to_string(),
        )
        .expect(3)
        .create_async()
        .await;

    let metrics = Arc::new(ClientMetrics::new());
    let primary = ApiClient::with_metrics(
        credential(&cloud.url()),
        ApiClientOptions::default(),
        metrics.clone(),
    )
    .unwrap();
    let secondary = ClimateClient::new(
        ClimateOptions {
            base_url: climate_server.url(),
            ..ClimateOptions::new(52.52, 13.41)
        },
        metrics.clone(),
    )
    .unwrap();
    let aggregator = FallbackAggregator::new(vec![Arc::new(primary), Arc::new(secondary)]);

    for _ in 0..3 {
        let reading = aggregator.collect_once().await.unwrap();
        assert_eq!(reading.source, Source::SecondaryClimate);
        assert_eq!(reading.temperature, Some(17.9));
    }

    status.assert_async().await;
    forecast.assert_async().await;
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.device_status.failure_count, 3);
    assert_eq!(snapshot.climate.success_count, 3);
}
