//! Device-list tracking
//!
//! `host:track-devices` streams full snapshots of the device list. The
//! tracker diffs consecutive snapshots into attach and detach signals. It is
//! seeded with the devices the daemon already tracks, so a fresh
//! subscription reports only what changed while the old one was down.

use common::{DeviceSignal, Error, SignalSender};
use protocol::host::{self, DeviceEntry};
use std::collections::HashSet;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Snapshot differ
#[derive(Debug, Default)]
pub struct DeviceTracker {
    online: HashSet<String>,
}

impl DeviceTracker {
    pub fn new(known: HashSet<String>) -> Self {
        Self { online: known }
    }

    /// Fold in a snapshot and return the resulting signals
    ///
    /// Only devices in the `device` state count as attached; a device that
    /// leaves that state or disappears from the list is detached.
    pub fn apply(&mut self, entries: &[DeviceEntry]) -> Vec<DeviceSignal> {
        let mut now = HashSet::with_capacity(entries.len());
        let mut attached = Vec::new();
        for entry in entries.iter().filter(|e| e.state.is_online()) {
            if now.insert(entry.serial.clone()) && !self.online.contains(&entry.serial) {
                attached.push(entry.serial.clone());
            }
        }

        let mut detached: Vec<String> = self.online.difference(&now).cloned().collect();
        detached.sort();

        self.online = now;

        detached
            .into_iter()
            .map(|device_id| DeviceSignal::Detach { device_id })
            .chain(
                attached
                    .into_iter()
                    .map(|device_id| DeviceSignal::Attach { device_id }),
            )
            .collect()
    }
}

/// Spawn the task reading snapshots from `stream` into `sender`
pub fn spawn_tracker<S>(stream: S, known: HashSet<String>, sender: SignalSender) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run_tracker(stream, DeviceTracker::new(known), sender))
}

async fn run_tracker<S>(mut stream: S, mut tracker: DeviceTracker, sender: SignalSender)
where
    S: AsyncRead + Unpin,
{
    loop {
        let failure = match host::read_string(&mut stream).await {
            Ok(payload) => {
                trace!("Device snapshot: {:?}", payload);
                match host::parse_device_list(&payload) {
                    Ok(entries) => {
                        for signal in tracker.apply(&entries) {
                            if sender.send(signal).await.is_err() {
                                debug!("Signal receiver gone, stopping tracker");
                                return;
                            }
                        }
                        continue;
                    }
                    Err(e) => Error::from(e),
                }
            }
            Err(e) => Error::from(e),
        };

        if failure.is_connection_closed() {
            warn!("adb server closed the tracking connection");
            let _ = sender
                .send(DeviceSignal::Error(Error::ConnectionClosed(
                    "Connection closed".to_string(),
                )))
                .await;
        } else {
            warn!("Device tracking failed: {}", failure);
            let _ = sender.send(DeviceSignal::Error(failure)).await;
            let _ = sender.send(DeviceSignal::End).await;
        }
        return;
    }
}
