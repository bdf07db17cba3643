//! Daemon configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "ServiceSettings::default_log_level")]
    pub log_level: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl ServiceSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Connection to the local adb server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbSettings {
    /// Address of the adb server's smart socket
    #[serde(default = "AdbSettings::default_server_addr")]
    pub server_addr: String,
    /// adb executable used for `adb start-server`
    #[serde(default = "AdbSettings::default_adb_path")]
    pub adb_path: String,
    /// Run `adb start-server` before every (re)subscription
    #[serde(default = "AdbSettings::default_start_server")]
    pub start_server: bool,
    #[serde(default = "AdbSettings::default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            server_addr: Self::default_server_addr(),
            adb_path: Self::default_adb_path(),
            start_server: Self::default_start_server(),
            connect_timeout_ms: Self::default_connect_timeout(),
        }
    }
}

impl AdbSettings {
    fn default_server_addr() -> String {
        "127.0.0.1:5037".to_string()
    }

    fn default_adb_path() -> String {
        "adb".to_string()
    }

    fn default_start_server() -> bool {
        true
    }

    fn default_connect_timeout() -> u64 {
        5000
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Per-device TCP bridges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Host the bridge listeners bind to
    #[serde(default = "BridgeSettings::default_bind_host")]
    pub bind_host: String,
    #[serde(default = "BridgeSettings::default_port_min")]
    pub port_min: u16,
    #[serde(default = "BridgeSettings::default_port_max")]
    pub port_max: u16,
    /// Grace period between an attach event and bridging, for device authorization
    #[serde(default = "BridgeSettings::default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Ports tried before an attach gives up on binding
    #[serde(default = "BridgeSettings::default_bind_attempts")]
    pub bind_attempts: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            bind_host: Self::default_bind_host(),
            port_min: Self::default_port_min(),
            port_max: Self::default_port_max(),
            settle_delay_ms: Self::default_settle_delay(),
            bind_attempts: Self::default_bind_attempts(),
        }
    }
}

impl BridgeSettings {
    fn default_bind_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port_min() -> u16 {
        1024
    }

    fn default_port_max() -> u16 {
        65535
    }

    fn default_settle_delay() -> u64 {
        3000
    }

    fn default_bind_attempts() -> u32 {
        3
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Report installed packages whose name contains this substring
    #[serde(default)]
    pub package_filter: Option<String>,
}

/// Lifecycle report collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    #[serde(default = "CollectorSettings::default_report_url")]
    pub report_url: String,
    #[serde(default = "CollectorSettings::default_disconnect_url")]
    pub disconnect_url: String,
    #[serde(default = "CollectorSettings::default_timeout")]
    pub timeout_ms: u64,
    /// Extra attempts after a failed report (0 = single attempt)
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "CollectorSettings::default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            report_url: Self::default_report_url(),
            disconnect_url: Self::default_disconnect_url(),
            timeout_ms: Self::default_timeout(),
            max_retries: 0,
            retry_backoff_ms: Self::default_retry_backoff(),
        }
    }
}

impl CollectorSettings {
    fn default_report_url() -> String {
        "http://127.0.0.1:5100/api/report".to_string()
    }

    fn default_disconnect_url() -> String {
        "http://127.0.0.1:5100/api/disconnect".to_string()
    }

    fn default_timeout() -> u64 {
        10_000
    }

    fn default_retry_backoff() -> u64 {
        500
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Event stream recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// Subscription attempts per connection-closed error
    #[serde(default = "TrackerSettings::default_max_attempts")]
    pub max_resubscribe_attempts: u32,
    #[serde(default = "TrackerSettings::default_backoff")]
    pub resubscribe_backoff_ms: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_resubscribe_attempts: Self::default_max_attempts(),
            resubscribe_backoff_ms: Self::default_backoff(),
        }
    }
}

impl TrackerSettings {
    fn default_max_attempts() -> u32 {
        3
    }

    fn default_backoff() -> u64 {
        1000
    }

    pub fn resubscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.resubscribe_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSettings {
    /// Close every open bridge when the process is asked to stop
    #[serde(default = "ShutdownSettings::default_true")]
    pub close_bridges: bool,
    /// Send an offline report for each bridge closed at shutdown
    #[serde(default = "ShutdownSettings::default_true")]
    pub report_offline: bool,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            close_bridges: true,
            report_offline: true,
        }
    }
}

impl ShutdownSettings {
    fn default_true() -> bool {
        true
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-tcp-bridge/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-tcp-bridge").join("config.toml")
        } else {
            PathBuf::from(".config/usb-tcp-bridge/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.service.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.service.log_level,
                valid_levels.join(", ")
            ));
        }

        self.adb
            .server_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("Invalid adb server_addr '{}'", self.adb.server_addr))?;

        if self.bridge.port_min < 1024 {
            return Err(anyhow!(
                "port_min {} is below the registered range (1024)",
                self.bridge.port_min
            ));
        }
        if self.bridge.port_min > self.bridge.port_max {
            return Err(anyhow!(
                "port_min {} is greater than port_max {}",
                self.bridge.port_min,
                self.bridge.port_max
            ));
        }
        if self.bridge.bind_attempts == 0 {
            return Err(anyhow!("bind_attempts must be at least 1"));
        }

        Self::validate_url("report_url", &self.collector.report_url)?;
        Self::validate_url("disconnect_url", &self.collector.disconnect_url)?;

        if self.tracker.max_resubscribe_attempts == 0 {
            return Err(anyhow!("max_resubscribe_attempts must be at least 1"));
        }

        Ok(())
    }

    fn validate_url(name: &str, url: &str) -> Result<()> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!(
                "Invalid {} '{}', expected an http:// or https:// URL",
                name,
                url
            ));
        }
        Ok(())
    }
}
