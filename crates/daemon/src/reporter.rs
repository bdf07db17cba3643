//! Lifecycle reporting to the external collector
//!
//! One HTTP POST per event: connect events go to the report endpoint,
//! disconnect events to the disconnect endpoint. Callers log failures and
//! carry on; nothing about bridge or registry state depends on delivery.

use crate::config::CollectorSettings;
use crate::registry::{OnlineStatus, SessionInfo};
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Body of a disconnect report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectReport {
    pub device_id: String,
    pub tcp_port: u16,
    pub online_status: OnlineStatus,
}

impl DisconnectReport {
    pub fn new(device_id: impl Into<String>, tcp_port: u16) -> Self {
        Self {
            device_id: device_id.into(),
            tcp_port,
            online_status: OnlineStatus::Offline,
        }
    }
}

/// A state transition to report
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Connected(SessionInfo),
    Disconnected(DisconnectReport),
}

impl LifecycleEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Connected(info) => &info.device_id,
            Self::Disconnected(report) => &report.device_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connect",
            Self::Disconnected(_) => "disconnect",
        }
    }
}

/// HTTP client for the collector
pub struct LifecycleReporter {
    client: reqwest::Client,
    report_url: String,
    disconnect_url: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl LifecycleReporter {
    pub fn new(settings: &CollectorSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| Error::Report(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            report_url: settings.report_url.clone(),
            disconnect_url: settings.disconnect_url.clone(),
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff(),
        })
    }

    /// Deliver `event`, retrying up to the configured bound
    pub async fn report(&self, event: &LifecycleEvent) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.send(event).await {
                Ok(()) => {
                    debug!(
                        "Delivered {} report for {} (attempt {})",
                        event.kind(),
                        event.device_id(),
                        attempt + 1
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} report for {} failed: {}; retry {}/{}",
                        event.kind(),
                        event.device_id(),
                        e,
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, event: &LifecycleEvent) -> Result<()> {
        let request = match event {
            LifecycleEvent::Connected(info) => self.client.post(&self.report_url).json(info),
            LifecycleEvent::Disconnected(report) => {
                self.client.post(&self.disconnect_url).json(report)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Report(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Report(format!("collector returned {}", status)));
        }
        Ok(())
    }
}
