// ABOUTME: Pool selection tests over real connections to the mock server

use std::time::Duration;

use gridconn::{ConnectionPool, ConnectorConfig, LoadClass};
use serde_json::{json, Value};

use super::mock_server::{Behavior, MockServer};

#[tokio::test]
async fn test_idle_connection_is_reused() {
    let server = MockServer::start(Behavior::Echo).await;
    let pool = ConnectionPool::new(ConnectorConfig::default());

    let first = pool.connect(&server.endpoint).await.unwrap();
    let second = pool.connect(&server.endpoint).await.unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(first.load(), LoadClass::Idle);
    assert_eq!(server.accepted(), 1);
    assert_eq!(pool.len().await, 1);

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.connections_dialed, 1);
    assert_eq!(snapshot.connections_reused, 1);
}

#[tokio::test]
async fn test_overloaded_connection_triggers_new_dial() {
    let server = MockServer::start(Behavior::Echo).await;
    let pool = ConnectionPool::new(ConnectorConfig::default());

    let first = pool.connect(&server.endpoint).await.unwrap();
    for _ in 0..1000 {
        drop(first.create_interface().unwrap());
    }
    assert_eq!(first.load(), LoadClass::Overloaded);

    let second = pool.connect(&server.endpoint).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(server.accepted(), 2);
    assert_eq!(pool.connections(&server.endpoint).await.len(), 2);

    // The fresh connection still serves requests
    let interface = second.create_interface().unwrap();
    let response: Option<Value> = interface.request("Ping", &json!({})).await.unwrap();
    assert!(response.is_some());
}

#[tokio::test]
async fn test_closed_connection_replaced_on_next_connect() {
    let server = MockServer::start(Behavior::Echo).await;
    let pool = ConnectionPool::new(ConnectorConfig::default());

    let first = pool.connect(&server.endpoint).await.unwrap();
    first.close().await;

    // The watcher removes it; a closed one is never handed out either way
    let second = pool.connect(&server.endpoint).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert!(second.is_connected());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.len().await, 1);
}

#[tokio::test]
async fn test_short_idle_timeout_reaps_pooled_connection() {
    let server = MockServer::start(Behavior::Echo).await;
    let config = ConnectorConfig {
        idle_timeout: Duration::from_millis(300),
        ..ConnectorConfig::default()
    };
    let pool = ConnectionPool::new(config);

    let connection = pool.connect(&server.endpoint).await.unwrap();
    tokio::time::timeout(Duration::from_secs(3), connection.closed())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pool.is_empty().await);
}
