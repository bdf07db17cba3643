//! Integration tests for configuration files
//!
//! - Minimal and full TOML documents
//! - Save/load round trip through the filesystem
//! - Rejection of invalid values

use daemon::BridgeConfig;
use std::time::Duration;

const MINIMAL_CONFIG: &str = r#"
[service]
log_level = "warn"
"#;

const FULL_CONFIG: &str = r#"
[service]
log_level = "debug"

[adb]
server_addr = "127.0.0.1:5038"
adb_path = "/opt/platform-tools/adb"
start_server = false
connect_timeout_ms = 2000

[bridge]
bind_host = "127.0.0.1"
port_min = 20000
port_max = 20999
settle_delay_ms = 1500
bind_attempts = 5

[probe]
package_filter = "com.yangcong345"

[collector]
report_url = "http://collector.local:5100/api/report"
disconnect_url = "http://collector.local:5100/api/disconnect"
timeout_ms = 3000
max_retries = 2
retry_backoff_ms = 250

[tracker]
max_resubscribe_attempts = 10
resubscribe_backoff_ms = 2000

[shutdown]
close_bridges = true
report_offline = false
"#;

#[test]
fn test_minimal_config_uses_defaults() {
    let config = BridgeConfig::from_toml(MINIMAL_CONFIG).unwrap();

    assert_eq!(config.service.log_level, "warn");
    assert_eq!(config.adb.server_addr, "127.0.0.1:5037");
    assert_eq!(config.bridge.port_min, 1024);
    assert_eq!(config.bridge.port_max, 65535);
    assert_eq!(config.bridge.settle_delay(), Duration::from_millis(3000));
    assert_eq!(config.probe.package_filter, None);
    assert_eq!(
        config.collector.report_url,
        "http://127.0.0.1:5100/api/report"
    );
    assert_eq!(
        config.collector.disconnect_url,
        "http://127.0.0.1:5100/api/disconnect"
    );
    assert!(config.shutdown.report_offline);
}

#[test]
fn test_empty_document_is_default() {
    let config = BridgeConfig::from_toml("").unwrap();
    assert_eq!(config.service.log_level, "info");
    assert_eq!(config.tracker.max_resubscribe_attempts, 3);
}

#[test]
fn test_full_config() {
    let config = BridgeConfig::from_toml(FULL_CONFIG).unwrap();

    assert_eq!(config.adb.server_addr, "127.0.0.1:5038");
    assert!(!config.adb.start_server);
    assert_eq!(config.adb.connect_timeout(), Duration::from_secs(2));
    assert_eq!(config.bridge.bind_host, "127.0.0.1");
    assert_eq!((config.bridge.port_min, config.bridge.port_max), (20000, 20999));
    assert_eq!(config.bridge.bind_attempts, 5);
    assert_eq!(config.probe.package_filter.as_deref(), Some("com.yangcong345"));
    assert_eq!(config.collector.max_retries, 2);
    assert_eq!(config.collector.timeout(), Duration::from_secs(3));
    assert_eq!(config.collector.retry_backoff(), Duration::from_millis(250));
    assert_eq!(config.tracker.resubscribe_backoff(), Duration::from_secs(2));
    assert!(!config.shutdown.report_offline);
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let config = BridgeConfig::from_toml(FULL_CONFIG).unwrap();
    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = BridgeConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.bridge.port_min, 20000);
    assert_eq!(loaded.collector.max_retries, 2);
    assert_eq!(loaded.probe.package_filter.as_deref(), Some("com.yangcong345"));
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(BridgeConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_invalid_values_rejected() {
    let cases = [
        "[service]\nlog_level = \"loud\"\n",
        "[adb]\nserver_addr = \"not-an-address\"\n",
        "[bridge]\nport_min = 80\n",
        "[bridge]\nport_min = 3000\nport_max = 2000\n",
        "[bridge]\nbind_attempts = 0\n",
        "[collector]\nreport_url = \"ftp://example.com\"\n",
        "[tracker]\nmax_resubscribe_attempts = 0\n",
        "[bridge]\nport_max = 70000\n",
    ];

    for case in cases {
        assert!(BridgeConfig::from_toml(case).is_err(), "accepted: {}", case);
    }
}
