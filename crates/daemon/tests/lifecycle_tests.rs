//! Bridge lifecycle integration tests
//!
//! Drives [`BridgeController`] against the scripted backend and a mock
//! collector.
//!
//! # Test Scenarios
//! - Connect and disconnect reports carry the same port
//! - Duplicate attaches and unknown detaches are no-ops
//! - Probe and report failures never block bridging or cleanup
//! - Detaches racing an attach in progress
//! - Port uniqueness under concurrent attaches
//!
//! Run with: `cargo test -p daemon --test lifecycle_tests`

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MEMINFO_6GB, MockBackend, PACKAGES_COMMAND, with_timeout,
};
use daemon::{AttachResult, BridgeConfig, BridgeController, DetachResult, DeviceRegistry};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn collector() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.bridge.settle_delay_ms = 0;
    config.bridge.port_min = 42000;
    config.bridge.port_max = 42999;
    config.collector.report_url = format!("{}/api/report", server.uri());
    config.collector.disconnect_url = format!("{}/api/disconnect", server.uri());
    config.collector.timeout_ms = 500;
    config
}

fn controller(backend: &MockBackend, config: &BridgeConfig) -> Arc<BridgeController> {
    Arc::new(
        BridgeController::new(
            Arc::new(backend.clone()),
            Arc::new(DeviceRegistry::new()),
            config,
        )
        .unwrap(),
    )
}

/// JSON bodies received on `endpoint`, in arrival order
async fn bodies(server: &MockServer, endpoint: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == endpoint)
        .map(|request| request.body_json::<Value>().unwrap())
        .collect()
}

// ============================================================================
// Reports
// ============================================================================

#[tokio::test]
async fn test_connect_then_disconnect_report_same_port() {
    let server = collector().await;
    let backend = MockBackend::new().with_android("13", MEMINFO_6GB);
    let controller = controller(&backend, &config(&server));

    let AttachResult::Registered(port) = controller.handle_attach("D1").await else {
        panic!("attach did not register");
    };
    assert_eq!(controller.handle_detach("D1").await, DetachResult::Released(port));

    assert_eq!(
        bodies(&server, "/api/report").await,
        vec![json!({
            "deviceId": "D1",
            "tcpPort": port,
            "systemVersion": "13",
            "memoryInGB": 6,
            "onlineStatus": "在线"
        })]
    );
    assert_eq!(
        bodies(&server, "/api/disconnect").await,
        vec![json!({
            "deviceId": "D1",
            "tcpPort": port,
            "onlineStatus": "离线"
        })]
    );
    assert_eq!(backend.closed_bridges(), vec![("D1".to_string(), Some(port))]);
}

#[tokio::test]
async fn test_package_list_reported_when_filtered() {
    let server = collector().await;
    let backend = MockBackend::new().with_android("11", MEMINFO_6GB);
    backend.set_shell_output(
        PACKAGES_COMMAND,
        "package:com.yangcong345.student\npackage:com.android.chrome\n",
    );
    let mut config = config(&server);
    config.probe.package_filter = Some("com.yangcong345".to_string());
    let controller = controller(&backend, &config);

    controller.handle_attach("D1").await;

    let reports = bodies(&server, "/api/report").await;
    assert_eq!(reports[0]["packageList"], json!(["com.yangcong345.student"]));
}

#[tokio::test]
async fn test_probe_failure_reports_sentinels() {
    let server = collector().await;
    let backend = MockBackend::new();
    let controller = controller(&backend, &config(&server));

    assert!(matches!(
        controller.handle_attach("D1").await,
        AttachResult::Registered(_)
    ));

    let reports = bodies(&server, "/api/report").await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["systemVersion"], "unknown");
    assert_eq!(reports[0]["memoryInGB"], 0);
    assert!(controller.registry().contains("D1"));
}

#[tokio::test]
async fn test_connect_report_failure_keeps_bridge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let backend = MockBackend::new();
    let controller = controller(&backend, &config(&server));

    let AttachResult::Registered(port) = controller.handle_attach("D1").await else {
        panic!("attach did not register");
    };
    assert!(controller.registry().contains("D1"));
    assert!(backend.closed_bridges().is_empty());
    assert!(controller.allocator().is_in_use(port));
}

#[tokio::test]
async fn test_disconnect_report_timeout_still_closes_bridge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/report"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/disconnect"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    let backend = MockBackend::new();
    let controller = controller(&backend, &config(&server));

    let AttachResult::Registered(port) = controller.handle_attach("D1").await else {
        panic!("attach did not register");
    };
    let result = with_timeout(DEFAULT_TEST_TIMEOUT, controller.handle_detach("D1"))
        .await
        .unwrap();

    assert_eq!(result, DetachResult::Released(port));
    assert_eq!(backend.closed_bridges(), vec![("D1".to_string(), Some(port))]);
    assert!(!controller.allocator().is_in_use(port));
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_duplicate_attach_opens_one_bridge() {
    let server = collector().await;
    let backend = MockBackend::new();
    let controller = controller(&backend, &config(&server));

    controller.handle_attach("D1").await;
    assert_eq!(controller.handle_attach("D1").await, AttachResult::Duplicate);

    assert_eq!(backend.opened_bridges(), vec!["D1".to_string()]);
    assert_eq!(bodies(&server, "/api/report").await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_attach() {
    let server = collector().await;
    let backend = MockBackend::new();
    backend.set_bridge_delay(Duration::from_millis(100));
    let controller = controller(&backend, &config(&server));

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.handle_attach("D1").await }
    });
    let second = tokio::spawn({
        let controller = controller.clone();
        async move { controller.handle_attach("D1").await }
    });

    let mut results = vec![first.await.unwrap(), second.await.unwrap()];
    results.sort_by_key(|r| matches!(r, AttachResult::Duplicate));
    assert!(matches!(results[0], AttachResult::Registered(_)));
    assert_eq!(results[1], AttachResult::Duplicate);
    assert_eq!(backend.opened_bridges().len(), 1);
}

#[tokio::test]
async fn test_detach_of_unknown_device_is_noop() {
    let server = collector().await;
    let backend = MockBackend::new();
    let controller = controller(&backend, &config(&server));

    assert_eq!(controller.handle_detach("ghost").await, DetachResult::NotTracked);
    assert!(backend.closed_bridges().is_empty());
    assert!(bodies(&server, "/api/disconnect").await.is_empty());
}

// ============================================================================
// Races with attaches in progress
// ============================================================================

#[tokio::test]
async fn test_detach_during_settle_delay_cancels_attach() {
    let server = collector().await;
    let backend = MockBackend::new();
    let mut config = config(&server);
    config.bridge.settle_delay_ms = 200;
    let controller = controller(&backend, &config);

    let attach = tokio::spawn({
        let controller = controller.clone();
        async move { controller.handle_attach("D1").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(controller.handle_detach("D1").await, DetachResult::CancelledPending);
    assert_eq!(attach.await.unwrap(), AttachResult::Cancelled);

    assert!(backend.opened_bridges().is_empty());
    assert!(controller.registry().is_empty());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_detach_during_bridge_setup_closes_bridge() {
    let server = collector().await;
    let backend = MockBackend::new();
    backend.set_bridge_delay(Duration::from_millis(200));
    let controller = controller(&backend, &config(&server));

    let attach = tokio::spawn({
        let controller = controller.clone();
        async move { controller.handle_attach("D1").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(controller.handle_detach("D1").await, DetachResult::CancelledPending);
    assert_eq!(attach.await.unwrap(), AttachResult::Cancelled);

    assert_eq!(backend.closed_bridges().len(), 1);
    assert_eq!(controller.allocator().in_use_count(), 0);
    assert!(controller.registry().is_empty());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());

    // The device can attach again afterwards
    assert!(matches!(
        controller.handle_attach("D1").await,
        AttachResult::Registered(_)
    ));
}

#[tokio::test]
async fn test_reattach_during_settle_delay_keeps_device() {
    let server = collector().await;
    let backend = MockBackend::new();
    let mut config = config(&server);
    config.bridge.settle_delay_ms = 200;
    let controller = controller(&backend, &config);

    let attach = tokio::spawn({
        let controller = controller.clone();
        async move { controller.handle_attach("D1").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(controller.handle_detach("D1").await, DetachResult::CancelledPending);
    assert_eq!(controller.handle_attach("D1").await, AttachResult::Duplicate);

    let AttachResult::Registered(port) = attach.await.unwrap() else {
        panic!("device came back but was not bridged");
    };
    assert!(controller.registry().contains("D1"));
    assert_eq!(backend.opened_bridges(), vec!["D1".to_string()]);
    assert!(backend.closed_bridges().is_empty());
    assert_eq!(bodies(&server, "/api/report").await.len(), 1);
    assert!(bodies(&server, "/api/disconnect").await.is_empty());

    assert_eq!(controller.handle_detach("D1").await, DetachResult::Released(port));
}

#[tokio::test]
async fn test_reattach_during_bridge_setup_keeps_bridge() {
    let server = collector().await;
    let backend = MockBackend::new();
    backend.set_bridge_delay(Duration::from_millis(200));
    let controller = controller(&backend, &config(&server));

    let attach = tokio::spawn({
        let controller = controller.clone();
        async move { controller.handle_attach("D1").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    controller.handle_detach("D1").await;
    controller.handle_attach("D1").await;

    assert!(matches!(attach.await.unwrap(), AttachResult::Registered(_)));
    assert!(controller.registry().contains("D1"));
    assert!(backend.closed_bridges().is_empty());
    assert_eq!(controller.allocator().in_use_count(), 1);
}

// ============================================================================
// Port allocation
// ============================================================================

#[tokio::test]
async fn test_concurrent_attaches_get_unique_ports() {
    let server = collector().await;
    let backend = MockBackend::new();
    let mut config = config(&server);
    config.bridge.port_min = 43000;
    config.bridge.port_max = 43039;
    let controller = controller(&backend, &config);

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.handle_attach(&format!("D{}", i)).await })
        })
        .collect();

    let mut ports = HashSet::new();
    for handle in handles {
        match handle.await.unwrap() {
            AttachResult::Registered(port) => assert!(ports.insert(port), "port {} reused", port),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(ports.len(), 40);
    assert_eq!(controller.registry().len(), 40);

    // Range is full now
    assert_eq!(controller.handle_attach("D40").await, AttachResult::Failed);
}

#[tokio::test]
async fn test_released_port_is_reusable() {
    let server = collector().await;
    let backend = MockBackend::new();
    let mut config = config(&server);
    config.bridge.port_min = 44000;
    config.bridge.port_max = 44000;
    let controller = controller(&backend, &config);

    assert_eq!(controller.handle_attach("D1").await, AttachResult::Registered(44000));
    assert_eq!(controller.handle_attach("D2").await, AttachResult::Failed);
    controller.handle_detach("D1").await;
    assert_eq!(controller.handle_attach("D2").await, AttachResult::Registered(44000));
}
