//! Attach and detach handling
//!
//! [`BridgeController`] turns device signals into bridge sessions. An
//! attach claims a pending registry slot, waits out the settle delay,
//! opens a bridge on a freshly allocated port, probes the device and
//! commits the session before reporting it. A detach removes the session,
//! reports it and releases the bridge whatever the report's fate.

use crate::allocator::{PortAllocator, PortLease};
use crate::config::BridgeConfig;
use crate::probe::DeviceInfoProbe;
use crate::registry::{
    AttachClaim, CommitOutcome, DetachOutcome, DeviceRegistry, DeviceSession,
};
use crate::reporter::{DisconnectReport, LifecycleEvent, LifecycleReporter};
use common::{BridgeAuth, BridgeHandle, DeviceBackend, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How an attach ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachResult {
    /// Bridged and registered on this port
    Registered(u16),
    /// Device already connected or connecting; nothing done
    Duplicate,
    /// A detach arrived before the attach finished; everything was undone
    Cancelled,
    /// The bridge could not be set up
    Failed,
}

/// How a detach ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachResult {
    /// Session removed and its bridge released
    Released(u16),
    /// An attach in progress was told to undo itself
    CancelledPending,
    /// Device was not tracked
    NotTracked,
}

pub struct BridgeController {
    backend: Arc<dyn DeviceBackend>,
    registry: Arc<DeviceRegistry>,
    allocator: PortAllocator,
    probe: DeviceInfoProbe,
    reporter: LifecycleReporter,
    auth: BridgeAuth,
    settle_delay: Duration,
    bind_attempts: u32,
}

impl BridgeController {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        registry: Arc<DeviceRegistry>,
        config: &BridgeConfig,
    ) -> Result<Self> {
        Ok(Self {
            allocator: PortAllocator::new(config.bridge.port_min, config.bridge.port_max),
            probe: DeviceInfoProbe::new(backend.clone(), config.probe.package_filter.clone()),
            reporter: LifecycleReporter::new(&config.collector)?,
            auth: BridgeAuth::AutoApprove,
            settle_delay: config.bridge.settle_delay(),
            bind_attempts: config.bridge.bind_attempts.max(1),
            backend,
            registry,
        })
    }

    /// Authorization applied to bridge clients
    pub fn with_auth(mut self, auth: BridgeAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    /// Bridge a newly attached device
    pub async fn handle_attach(&self, device_id: &str) -> AttachResult {
        match self.registry.begin_attach(device_id) {
            AttachClaim::Claimed => {}
            AttachClaim::AlreadyPending | AttachClaim::AlreadyActive => {
                info!("Device {} already connected, skipping", device_id);
                return AttachResult::Duplicate;
            }
            AttachClaim::Resumed => {
                info!("Device {} is back; the pending attach carries on", device_id);
                return AttachResult::Duplicate;
            }
        }
        info!("Device {} connecting...", device_id);

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        if self.registry.finish_if_cancelled(device_id) {
            info!("Device {} went away before bridging", device_id);
            return AttachResult::Cancelled;
        }

        let (bridge, lease) = match self.open_bridge(device_id).await {
            Ok(opened) => opened,
            Err(e) => {
                error!("Failed to bridge device {}: {}", device_id, e);
                if self.registry.abandon_attach(device_id) {
                    debug!("Device {} was detached during the failed attach", device_id);
                }
                return AttachResult::Failed;
            }
        };

        let info = self.probe.probe(device_id).await;
        let session = DeviceSession::new(device_id, info, bridge, lease);
        let snapshot = session.snapshot();
        let port = snapshot.tcp_port;

        if let CommitOutcome::Cancelled(session) = self.registry.commit(session) {
            let port = session.release();
            info!(
                "Device {} detached while connecting; closed bridge on port {}",
                device_id, port
            );
            return AttachResult::Cancelled;
        }

        info!(
            "Device {} mapped to TCP port {} (Android {}, {} GB)",
            device_id, port, snapshot.system_version, snapshot.memory_in_gb
        );

        match self.reporter.report(&LifecycleEvent::Connected(snapshot)).await {
            Ok(()) => info!("Reported device {} online", device_id),
            Err(e) => warn!("Failed to report device {} online: {}", device_id, e),
        }

        AttachResult::Registered(port)
    }

    /// Create a bridge and start it on a free port, retrying on bind failures
    async fn open_bridge(&self, device_id: &str) -> Result<(Box<dyn BridgeHandle>, PortLease)> {
        let mut bridge = self
            .backend
            .create_bridge(device_id, self.auth.clone())
            .await?;

        let mut last_error = None;
        for attempt in 1..=self.bind_attempts {
            let lease = match self.allocator.allocate() {
                Ok(lease) => lease,
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            };

            match bridge.listen(lease.port()).await {
                Ok(()) => return Ok((bridge, lease)),
                Err(e) => {
                    warn!(
                        "Bridge for {} could not listen on port {} (attempt {}/{}): {}",
                        device_id,
                        lease.port(),
                        attempt,
                        self.bind_attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        bridge.close();
        Err(last_error.unwrap_or_else(|| Error::Bridge("no bind attempt made".to_string())))
    }

    /// Tear down a detached device's bridge
    pub async fn handle_detach(&self, device_id: &str) -> DetachResult {
        info!("Device {} disconnecting...", device_id);

        let session = match self.registry.take(device_id) {
            DetachOutcome::Removed(session) => session,
            DetachOutcome::CancelledPending => {
                info!("Device {} still connecting; attach will be undone", device_id);
                return DetachResult::CancelledPending;
            }
            DetachOutcome::Absent => {
                info!("Device {} is not in the connected list, skipping cleanup", device_id);
                return DetachResult::NotTracked;
            }
        };

        let port = session.tcp_port();
        let event = LifecycleEvent::Disconnected(DisconnectReport::new(device_id, port));
        match self.reporter.report(&event).await {
            Ok(()) => info!("Reported device {} offline", device_id),
            Err(e) => warn!("Failed to report device {} offline: {}", device_id, e),
        }

        session.release();
        info!("Device {} cleaned up, port {} released", device_id, port);
        DetachResult::Released(port)
    }

    /// Release every session; returns how many were released
    pub async fn shutdown(&self, report_offline: bool) -> usize {
        let sessions = self.registry.drain();
        let count = sessions.len();

        for session in sessions {
            let device_id = session.device_id().to_string();
            let port = session.tcp_port();
            if report_offline {
                let event = LifecycleEvent::Disconnected(DisconnectReport::new(&device_id, port));
                if let Err(e) = self.reporter.report(&event).await {
                    warn!("Failed to report device {} offline: {}", device_id, e);
                }
            }
            session.release();
            debug!("Released device {} (port {})", device_id, port);
        }

        if count > 0 {
            info!("Released {} bridge(s)", count);
        }
        count
    }
}
