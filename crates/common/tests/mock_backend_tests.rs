//! Mock Backend Integration Tests
//!
//! Exercises the backend seam through the scripted backend the daemon tests
//! rely on.
//!
//! # Test Scenarios
//! - Signal injection into the live subscription
//! - Subscription replacement
//! - Bridge lifecycle recording
//! - Scripted failures
//!
//! Run with: `cargo test -p common --test mock_backend_tests`

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MEMINFO_6GB, MEMINFO_COMMAND, MockBackend, VERSION_COMMAND, with_timeout,
};
use common::{BridgeAuth, DeviceBackend, DeviceSignal, Error};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Subscription Tests
// ============================================================================

#[tokio::test]
async fn test_signals_reach_latest_subscription() {
    let backend = MockBackend::new();
    assert!(!backend.attach("D1").await);

    let first = backend.track_devices(HashSet::new()).await.unwrap();
    assert!(backend.attach("D1").await);
    assert!(matches!(
        with_timeout(DEFAULT_TEST_TIMEOUT, first.recv()).await.unwrap(),
        Some(DeviceSignal::Attach { device_id }) if device_id == "D1"
    ));

    let known: HashSet<String> = ["D1".to_string()].into();
    let second = backend.track_devices(known.clone()).await.unwrap();
    assert!(backend.detach("D1").await);
    assert!(matches!(
        with_timeout(DEFAULT_TEST_TIMEOUT, second.recv()).await.unwrap(),
        Some(DeviceSignal::Detach { device_id }) if device_id == "D1"
    ));

    assert_eq!(backend.subscription_count(), 2);
    assert_eq!(backend.known_sets(), vec![HashSet::new(), known]);
}

#[tokio::test]
async fn test_dropped_subscription_rejects_signals() {
    let backend = MockBackend::new();
    let subscription = backend.track_devices(HashSet::new()).await.unwrap();
    drop(subscription);

    assert!(!backend.emit(DeviceSignal::End).await);
}

#[tokio::test]
async fn test_scripted_track_failures() {
    let backend = MockBackend::new();
    backend.fail_next_tracks(2);

    assert!(matches!(
        backend.track_devices(HashSet::new()).await,
        Err(Error::Network(_))
    ));
    assert!(backend.track_devices(HashSet::new()).await.is_err());
    assert!(backend.track_devices(HashSet::new()).await.is_ok());
    assert_eq!(backend.subscription_count(), 1);
}

// ============================================================================
// Bridge Tests
// ============================================================================

#[tokio::test]
async fn test_bridge_records_listen_and_close() {
    let backend = MockBackend::new();
    let mut bridge = backend
        .create_bridge("D1", BridgeAuth::AutoApprove)
        .await
        .unwrap();

    bridge.listen(5555).await.unwrap();
    assert_eq!(bridge.port(), Some(5555));
    bridge.close();
    bridge.close();
    drop(bridge);

    assert_eq!(backend.opened_bridges(), vec!["D1".to_string()]);
    assert_eq!(backend.listened(), vec![("D1".to_string(), 5555)]);
    assert_eq!(backend.closed_bridges(), vec![("D1".to_string(), Some(5555))]);
}

#[tokio::test]
async fn test_dropped_bridge_is_closed() {
    let backend = MockBackend::new();
    let auth = BridgeAuth::Verify(Arc::new(|_: &[u8]| true));
    let bridge = backend.create_bridge("D2", auth).await.unwrap();
    drop(bridge);

    assert_eq!(backend.closed_bridges(), vec![("D2".to_string(), None)]);
}

#[tokio::test]
async fn test_scripted_bridge_failures() {
    let backend = MockBackend::new();
    backend.fail_bridge_for("bad");
    backend.fail_next_listens(1);

    assert!(matches!(
        backend.create_bridge("bad", BridgeAuth::AutoApprove).await,
        Err(Error::Bridge(_))
    ));

    let mut bridge = backend
        .create_bridge("good", BridgeAuth::AutoApprove)
        .await
        .unwrap();
    assert!(bridge.listen(6000).await.is_err());
    assert!(bridge.listen(6001).await.is_ok());
    assert_eq!(backend.listened(), vec![("good".to_string(), 6001)]);
}

// ============================================================================
// Shell Tests
// ============================================================================

#[tokio::test]
async fn test_shell_outputs() {
    let backend = MockBackend::new().with_android("14", MEMINFO_6GB);

    assert_eq!(backend.shell("D1", VERSION_COMMAND).await.unwrap(), "14\n");
    assert_eq!(backend.shell("D1", MEMINFO_COMMAND).await.unwrap(), MEMINFO_6GB);
    assert!(matches!(
        backend.shell("D1", "uptime").await,
        Err(Error::Adb(_))
    ));

    backend.clear_shell_outputs();
    assert!(backend.shell("D1", VERSION_COMMAND).await.is_err());
    assert_eq!(backend.shell_calls().len(), 4);
}
