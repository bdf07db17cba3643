//! usb-tcp-bridge
//!
//! Bridges USB-attached Android devices to TCP ports and reports each
//! bridge to a collector.

use anyhow::{Context, Result};
use clap::Parser;
use common::{DeviceBackend, setup_logging};
use daemon::adb::{AdbBackend, AdbClient};
use daemon::{BridgeConfig, BridgeController, DeviceRegistry, EventStreamSupervisor, service};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-tcp-bridge")]
#[command(
    author,
    version,
    about = "Expose USB-attached Android devices as adb-over-TCP endpoints"
)]
#[command(long_about = "
Watches the local adb server for devices and opens a TCP bridge for each
one, so `adb connect <host>:<port>` works from anywhere on the network.
Connect and disconnect events are reported to an HTTP collector.

EXAMPLES:
    # Run with default config
    usb-tcp-bridge

    # Run with custom config
    usb-tcp-bridge --config /path/to/config.toml

    # Run with debug logging
    usb-tcp-bridge --log-level debug

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-tcp-bridge/config.toml
    3. /etc/usb-tcp-bridge/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = BridgeConfig::default();
        let path = BridgeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        BridgeConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        BridgeConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.service.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-tcp-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    run(config).await
}

async fn run(config: BridgeConfig) -> Result<()> {
    if service::is_systemd() {
        info!("Running under systemd");
    }

    let client = AdbClient::new(config.adb.clone());
    let backend: Arc<dyn DeviceBackend> = Arc::new(AdbBackend::new(
        client,
        config.bridge.bind_host.clone(),
    ));
    let registry = Arc::new(DeviceRegistry::new());
    let controller = Arc::new(
        BridgeController::new(backend.clone(), registry, &config)
            .context("Failed to initialize bridge controller")?,
    );
    let supervisor = EventStreamSupervisor::new(
        backend,
        controller,
        config.tracker.clone(),
        config.shutdown.clone(),
    );

    info!(
        "Bridging on {} ports {}-{}, reporting to {}",
        config.bridge.bind_host,
        config.bridge.port_min,
        config.bridge.port_max,
        config.collector.report_url
    );

    service::notify_ready().context("Failed to notify systemd ready")?;
    service::notify_status("Monitoring devices").context("Failed to send status to systemd")?;

    info!("Press Ctrl+C to shutdown");
    supervisor
        .run(shutdown_signal())
        .await
        .context("Device monitoring failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Error waiting for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Error installing SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }

    if let Err(e) = service::notify_stopping() {
        warn!("{:#}", e);
    }
}
