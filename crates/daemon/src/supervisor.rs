//! Event-stream supervision
//!
//! Owns the backend subscription. Attach and detach signals are dispatched
//! to handler tasks so slow bridging never delays the next signal. A
//! "connection closed" error replaces the subscription; handlers already in
//! flight keep running against the shared registry. Any other error is
//! logged, and a normal end of stream leaves the daemon idle until shutdown.

use crate::config::{ShutdownSettings, TrackerSettings};
use crate::lifecycle::BridgeController;
use common::{DeviceBackend, DeviceSignal, Error, Result, Subscription};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct EventStreamSupervisor {
    backend: Arc<dyn DeviceBackend>,
    controller: Arc<BridgeController>,
    tracker: TrackerSettings,
    shutdown: ShutdownSettings,
    handlers: JoinSet<()>,
    subscriptions: u64,
}

impl EventStreamSupervisor {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        controller: Arc<BridgeController>,
        tracker: TrackerSettings,
        shutdown: ShutdownSettings,
    ) -> Self {
        Self {
            backend,
            controller,
            tracker,
            shutdown,
            handlers: JoinSet::new(),
            subscriptions: 0,
        }
    }

    /// Supervise the event stream until `shutdown` resolves
    ///
    /// Fails only if the initial subscription cannot be established.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Starting device monitoring...");
        tokio::pin!(shutdown);

        let mut subscription = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested before device tracking started");
                return Ok(());
            }
            subscribed = self.subscribe() => match subscribed {
                Some(subscription) => Some(subscription),
                None => {
                    return Err(Error::Network(
                        "could not subscribe to device events".to_string(),
                    ));
                }
            },
        };

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                signal = next_signal(subscription.as_ref()) => match signal {
                    Some(DeviceSignal::Attach { device_id }) => self.dispatch_attach(device_id),
                    Some(DeviceSignal::Detach { device_id }) => self.dispatch_detach(device_id),
                    Some(DeviceSignal::Error(e)) if e.is_connection_closed() => {
                        warn!("Device tracking connection closed, restarting...");
                        drop(subscription.take());
                        // Retries can take a while; stay responsive to shutdown
                        tokio::select! {
                            _ = &mut shutdown => {
                                info!("Shutdown requested while restarting device tracking");
                                break;
                            }
                            resubscribed = self.subscribe() => {
                                subscription = resubscribed;
                                if subscription.is_none() {
                                    error!("Device tracking could not be restarted; no further device events");
                                }
                            }
                        }
                    }
                    Some(DeviceSignal::Error(e)) => {
                        error!("Error tracking devices: {}", e);
                    }
                    Some(DeviceSignal::End) => {
                        info!("Device tracking ended");
                        subscription = None;
                    }
                    None => {
                        warn!("Device event stream closed without an end signal");
                        subscription = None;
                    }
                },
                Some(joined) = self.handlers.join_next(), if !self.handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Device handler panicked: {}", e);
                        }
                    }
                }
            }
        }

        drop(subscription);
        self.stop().await;
        Ok(())
    }

    /// Open a subscription, retrying within the configured bound
    async fn subscribe(&mut self) -> Option<Subscription> {
        let attempts = self.tracker.max_resubscribe_attempts.max(1);
        for attempt in 1..=attempts {
            let known = self.controller.registry().tracked_ids();
            match self.backend.track_devices(known).await {
                Ok(subscription) => {
                    self.subscriptions += 1;
                    info!("Device tracking started (subscription #{})", self.subscriptions);
                    return Some(subscription);
                }
                Err(e) => {
                    error!(
                        "Failed to start device tracking (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.tracker.resubscribe_backoff()).await;
                    }
                }
            }
        }
        None
    }

    fn dispatch_attach(&mut self, device_id: String) {
        debug!("Attach signal for {}", device_id);
        let controller = self.controller.clone();
        self.handlers.spawn(async move {
            controller.handle_attach(&device_id).await;
        });
    }

    fn dispatch_detach(&mut self, device_id: String) {
        debug!("Detach signal for {}", device_id);
        let controller = self.controller.clone();
        self.handlers.spawn(async move {
            controller.handle_detach(&device_id).await;
        });
    }

    async fn stop(&mut self) {
        // Aborted attaches drop their half-built bridge and lease
        self.handlers.shutdown().await;

        if self.shutdown.close_bridges {
            let released = self
                .controller
                .shutdown(self.shutdown.report_offline)
                .await;
            info!("Closed {} bridge(s) on shutdown", released);
        } else {
            info!("Leaving bridges of {} device(s) open", self.controller.registry().len());
        }
    }
}

async fn next_signal(subscription: Option<&Subscription>) -> Option<DeviceSignal> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
