//! adb server backend
//!
//! Production [`DeviceBackend`]: device tracking, bridges and shell
//! commands, all through the local adb server.

pub mod bridge;
pub mod client;
pub mod tracker;
pub mod transport;

pub use bridge::AdbBridge;
pub use client::AdbClient;
pub use tracker::DeviceTracker;

use async_trait::async_trait;
use common::{BridgeAuth, BridgeHandle, DeviceBackend, Result, Subscription, create_signal_channel};
use std::collections::HashSet;
use tracing::{info, warn};

pub struct AdbBackend {
    client: AdbClient,
    bind_host: String,
}

impl AdbBackend {
    pub fn new(client: AdbClient, bind_host: impl Into<String>) -> Self {
        Self {
            client,
            bind_host: bind_host.into(),
        }
    }

    pub fn client(&self) -> &AdbClient {
        &self.client
    }
}

#[async_trait]
impl DeviceBackend for AdbBackend {
    async fn track_devices(&self, known: HashSet<String>) -> Result<Subscription> {
        if self.client.settings().start_server {
            if let Err(e) = self.client.start_server().await {
                // A server started by someone else is still usable
                warn!("{}", e);
            }
        }

        let stream = self.client.track_devices().await?;
        info!(
            "Tracking devices via {} ({} already known)",
            self.client.settings().server_addr,
            known.len()
        );

        let (tx, rx) = create_signal_channel();
        let producer = tracker::spawn_tracker(stream, known, tx);
        Ok(Subscription::new(rx, Some(producer)))
    }

    async fn create_bridge(&self, device_id: &str, auth: BridgeAuth) -> Result<Box<dyn BridgeHandle>> {
        Ok(Box::new(AdbBridge::new(
            device_id,
            self.client.clone(),
            &self.bind_host,
            auth,
        )))
    }

    async fn shell(&self, device_id: &str, command: &str) -> Result<String> {
        self.client.shell(device_id, command).await
    }
}
