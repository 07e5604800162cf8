//! Integration tests for the connection registry lifecycle.

mod common;

use common::{FakeConnector, sample_configs};
use sql_gateway::db::ConnectionRegistry;
use sql_gateway::db::registry::CLOSE_ALL_SLOT_WAIT;
use sql_gateway::error::{ErrorKind, GatewayError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(300);

fn registry(connector: Arc<FakeConnector>) -> ConnectionRegistry {
    ConnectionRegistry::new(sample_configs(), connector, TIMEOUT)
}

#[tokio::test(start_paused = true)]
async fn test_acquire_then_trivial_query() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    let mut lease = registry.acquire("mysql").await.unwrap();
    let result = lease.execute("SELECT 1").await.unwrap();

    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.row_count(), 1);
    assert_eq!(connector.state.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reuses_live_connection() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    let first = registry.acquire("mysql").await.unwrap().connection_id();
    let second = registry.acquire("mysql").await.unwrap().connection_id();

    assert_eq!(first, second);
    assert_eq!(connector.state.connects(), 1);
    // MySQL supports ping: probed on reuse
    assert_eq!(connector.state.probes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_connection_is_replaced() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    let first = registry.acquire("warehouse").await.unwrap().connection_id();
    tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
    let second = registry.acquire("warehouse").await.unwrap().connection_id();

    assert_ne!(first, second);
    assert_eq!(connector.state.connects(), 2);
    assert_eq!(connector.state.closes(), 1);
    assert_eq!(registry.entry_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_within_timeout_is_kept() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    let first = registry.acquire("warehouse").await.unwrap().connection_id();
    tokio::time::advance(TIMEOUT - Duration::from_secs(1)).await;
    let second = registry.acquire("warehouse").await.unwrap().connection_id();

    assert_eq!(first, second);
    assert_eq!(connector.state.closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_successful_use_refreshes_last_used() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    let first = registry.acquire("warehouse").await.unwrap().connection_id();
    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(200)).await;
        let mut lease = registry.acquire("warehouse").await.unwrap();
        lease.execute("SELECT 1").await.unwrap();
    }
    let last = registry.acquire("warehouse").await.unwrap().connection_id();

    assert_eq!(first, last);
    assert_eq!(connector.state.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dead_probe_triggers_reconnect() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    let first = registry.acquire("mysql").await.unwrap().connection_id();
    connector.report_dead_probes(1);
    let second = registry.acquire("mysql").await.unwrap().connection_id();

    assert_ne!(first, second);
    assert_eq!(connector.state.connects(), 2);
    assert_eq!(connector.state.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backend_without_ping_is_not_probed() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    registry.acquire("warehouse").await.unwrap();
    registry.acquire("warehouse").await.unwrap();

    assert_eq!(connector.state.probes(), 0);
    assert_eq!(connector.state.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_name_never_connects() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    let err = registry.acquire("nope").await.unwrap_err();

    assert!(matches!(err, GatewayError::ConfigNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::ConfigNotFound);
    assert_eq!(connector.state.connects(), 0);
    assert_eq!(registry.entry_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_error_is_returned() {
    let connector = Arc::new(FakeConnector::new());
    connector.fail_next_connects(1);
    let registry = registry(connector.clone());

    let err = registry.acquire("mysql").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(registry.entry_count().await, 0);

    // Next acquire connects again
    registry.acquire("mysql").await.unwrap();
    assert_eq!(connector.state.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_reconnect() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    let first = registry.acquire("mysql").await.unwrap().connection_id();
    registry.invalidate("mysql").await;
    assert_eq!(registry.entry_count().await, 0);
    let second = registry.acquire("mysql").await.unwrap().connection_id();

    assert_ne!(first, second);
    assert_eq!(connector.state.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lease_invalidate_swallows_close_error() {
    let connector = Arc::new(FakeConnector::new());
    connector.fail_closes();
    let registry = registry(connector.clone());

    let lease = registry.acquire("mysql").await.unwrap();
    lease.invalidate().await;

    assert_eq!(connector.state.closes(), 1);
    assert_eq!(registry.entry_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_all_empties_registry_despite_errors() {
    let connector = Arc::new(FakeConnector::new());
    let registry = registry(connector.clone());

    registry.acquire("mysql").await.unwrap();
    registry.acquire("warehouse").await.unwrap();
    assert_eq!(registry.entry_count().await, 2);

    connector.fail_closes();
    registry.close_all().await;

    assert_eq!(registry.entry_count().await, 0);
    assert_eq!(connector.state.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquire_same_name_connects_once() {
    let connector =
        Arc::new(FakeConnector::new().with_connect_delay("mysql", Duration::from_secs(2)));
    let registry = Arc::new(registry(connector.clone()));

    let a = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.acquire("mysql").await.unwrap().connection_id() })
    };
    let b = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.acquire("mysql").await.unwrap().connection_id() })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_eq!(a, b);
    assert_eq!(connector.state.connects(), 1);
    assert_eq!(connector.state.closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_stale_detection_closes_once() {
    let connector = Arc::new(FakeConnector::new());
    let registry = Arc::new(registry(connector.clone()));

    registry.acquire("warehouse").await.unwrap();
    tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire("warehouse").await.unwrap().connection_id() })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(connector.state.closes(), 1);
    assert_eq!(connector.state.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_all_skips_slot_held_forever() {
    let connector = Arc::new(FakeConnector::new());
    let registry = Arc::new(registry(connector.clone()));

    registry.acquire("warehouse").await.unwrap();
    let (leased_tx, leased_rx) = tokio::sync::oneshot::channel();
    let stuck = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let _lease = registry.acquire("mysql").await.unwrap();
            leased_tx.send(()).unwrap();
            std::future::pending::<()>().await;
        })
    };
    leased_rx.await.unwrap();

    let start = Instant::now();
    let finished = tokio::time::timeout(Duration::from_secs(3600), registry.close_all()).await;

    assert!(finished.is_ok());
    assert!(start.elapsed() >= CLOSE_ALL_SLOT_WAIT);
    assert!(start.elapsed() < CLOSE_ALL_SLOT_WAIT * 2);
    // Only the idle connection was closed
    assert_eq!(connector.state.closes(), 1);
    assert_eq!(registry.entry_count().await, 0);
    stuck.abort();
}
