// ABOUTME: End-to-end request tests against the mock connector server

use std::time::{Duration, Instant};

use gridconn::{ConnectionPool, ConnectorConfig, ConnectorError};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::mock_server::{Behavior, MockServer};

#[derive(Debug, Serialize)]
struct FilterRequest {
    text: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Echoed {
    request_type: String,
    payload: Value,
}

fn pool() -> ConnectionPool {
    ConnectionPool::new(ConnectorConfig::default())
}

#[tokio::test]
async fn test_request_round_trip() {
    let server = MockServer::start(Behavior::Echo).await;
    let pool = pool();

    let connection = pool.connect(&server.endpoint).await.unwrap();
    let interface = connection.create_interface().unwrap();
    let response: Option<Echoed> = interface
        .request(
            "FilterText",
            &FilterRequest {
                text: "hello".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(
        response,
        Some(Echoed {
            request_type: "FilterText".to_string(),
            payload: json!({ "text": "hello" }),
        })
    );
    pool.shutdown().await;
}

#[tokio::test]
async fn test_handshake_request_lines() {
    let server = MockServer::start(Behavior::Echo).await;
    let pool = pool();
    pool.connect(&server.endpoint).await.unwrap();

    let handshakes = server.handshakes();
    assert_eq!(handshakes.len(), 1);
    let lines = &handshakes[0];

    assert_eq!(lines[0], "POST %2Fgrid%2Fapiconnector HTTP/1.1");
    assert_eq!(lines.len(), 4);
    let request_id = lines[1].strip_prefix("X-Request-ID: ").unwrap();
    let random_id = lines[2].strip_prefix("X-Request-RNDID: ").unwrap();
    assert!(Uuid::parse_str(request_id).is_ok());
    assert!(Uuid::parse_str(random_id).is_ok());
    assert_ne!(request_id, random_id);
    assert_eq!(lines[3], "Upgrade: GRIDAPICONNECTOR");
}

#[tokio::test]
async fn test_silent_server_times_out_with_none() {
    let server = MockServer::start(Behavior::Silent).await;
    let pool = pool();
    let connection = pool.connect(&server.endpoint).await.unwrap();
    let interface = connection.create_interface().unwrap();

    let started = Instant::now();
    let response: Option<Value> = interface
        .request_with_timeout("FilterText", &json!({}), Duration::from_millis(300))
        .await
        .unwrap();

    assert!(response.is_none());
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(connection.is_connected());
}

#[tokio::test]
async fn test_rejected_upgrade_reports_status() {
    let server = MockServer::start(Behavior::Reject("403 Forbidden")).await;
    let pool = pool();

    let err = pool.connect(&server.endpoint).await.unwrap_err();
    assert!(matches!(&err, ConnectorError::Status(text) if text == "403 Forbidden"));
    assert_eq!(err.to_string(), "Received HTTP 403 Forbidden");
    assert!(pool.is_empty().await);
    assert_eq!(pool.metrics().snapshot().dial_failures, 1);
}

#[tokio::test]
async fn test_server_hangup_resolves_waiters() {
    let server = MockServer::start(Behavior::HangUp).await;
    let pool = pool();
    let connection = pool.connect(&server.endpoint).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), connection.closed())
        .await
        .unwrap();
    assert!(!connection.is_connected());
    assert!(matches!(
        connection.create_interface(),
        Err(ConnectorError::Disconnected)
    ));
}

#[tokio::test]
async fn test_concurrent_interfaces_get_their_own_responses() {
    let server = MockServer::start(Behavior::Echo).await;
    let pool = pool();
    let connection = pool.connect(&server.endpoint).await.unwrap();

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let interface = connection.create_interface().unwrap();
            tokio::spawn(async move {
                let response: Option<Echoed> = interface
                    .request("Count", &json!({ "n": n }))
                    .await
                    .unwrap();
                (n, response)
            })
        })
        .collect();

    for handle in handles {
        let (n, response) = handle.await.unwrap();
        assert_eq!(response.unwrap().payload, json!({ "n": n }));
    }
    assert_eq!(connection.metrics().requests(), 20);
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_unsupported_scheme_is_rejected() {
    let pool = pool();
    let err = pool.connect("ftp://example.com/").await.unwrap_err();
    assert!(matches!(err, ConnectorError::UnsupportedScheme(scheme) if scheme == "ftp"));
}
