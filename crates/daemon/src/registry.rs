//! Device registry
//!
//! Authoritative in-memory record of bridged devices, keyed by device id.
//! Every mutation is a single check-then-act under one lock, so handlers
//! interleaving at await points can never double-register or double-release
//! a device.
//!
//! An attach in progress holds a *pending* slot. A detach arriving meanwhile
//! cancels the slot instead of being lost, and the attach cleans up after
//! itself when it tries to commit. A fresh attach for a cancelled slot
//! revokes the cancellation, so the attach already in flight registers the
//! device after all.

use crate::allocator::PortLease;
use crate::probe::DeviceInfo;
use common::BridgeHandle;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Lifecycle state mirrored to the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlineStatus {
    #[serde(rename = "在线")]
    Online,
    #[serde(rename = "离线")]
    Offline,
}

/// One currently-bridged device
///
/// Owns its bridge and its port lease; [`release`](DeviceSession::release)
/// closes the bridge and returns the port.
pub struct DeviceSession {
    device_id: String,
    info: DeviceInfo,
    status: OnlineStatus,
    bridge: Box<dyn BridgeHandle>,
    lease: PortLease,
}

impl DeviceSession {
    pub fn new(
        device_id: impl Into<String>,
        info: DeviceInfo,
        bridge: Box<dyn BridgeHandle>,
        lease: PortLease,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            info,
            status: OnlineStatus::Online,
            bridge,
            lease,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn tcp_port(&self) -> u16 {
        self.lease.port()
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn status(&self) -> OnlineStatus {
        self.status
    }

    /// Serializable view of this session
    pub fn snapshot(&self) -> SessionInfo {
        SessionInfo {
            device_id: self.device_id.clone(),
            tcp_port: self.tcp_port(),
            system_version: self.info.software_version.clone(),
            memory_in_gb: self.info.memory_gb,
            online_status: self.status,
            package_list: self.info.packages.clone(),
        }
    }

    /// Close the bridge and give the port back
    pub fn release(mut self) -> u16 {
        let port = self.tcp_port();
        self.status = OnlineStatus::Offline;
        self.bridge.close();
        port
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id)
            .field("tcp_port", &self.tcp_port())
            .field("info", &self.info)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Session view as sent to the collector in connect reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub device_id: String,
    pub tcp_port: u16,
    pub system_version: String,
    #[serde(rename = "memoryInGB")]
    pub memory_in_gb: u64,
    pub online_status: OnlineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_list: Option<Vec<String>>,
}

/// Result of trying to start an attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachClaim {
    /// The caller now owns the pending slot
    Claimed,
    /// Another attach for this device is in progress
    AlreadyPending,
    /// A detach had cancelled the attach in progress; it now goes ahead
    Resumed,
    /// The device is already bridged
    AlreadyActive,
}

/// Result of committing a finished attach
#[derive(Debug)]
pub enum CommitOutcome {
    Registered,
    /// A detach arrived while pending; the session is handed back for cleanup
    Cancelled(DeviceSession),
}

/// Result of a detach lookup
#[derive(Debug)]
pub enum DetachOutcome {
    /// The session was removed and is now owned by the caller
    Removed(DeviceSession),
    /// An attach was in progress and has been told to undo itself
    CancelledPending,
    /// Nothing known about this device
    Absent,
}

enum Slot {
    Pending { cancelled: bool },
    Active(DeviceSession),
}

/// Registry of pending and active device sessions
#[derive(Default)]
pub struct DeviceRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the pending slot for `device_id` unless it is already tracked
    pub fn begin_attach(&self, device_id: &str) -> AttachClaim {
        let mut slots = self.slots();
        match slots.get_mut(device_id) {
            Some(Slot::Active(_)) => AttachClaim::AlreadyActive,
            Some(Slot::Pending { cancelled }) if *cancelled => {
                *cancelled = false;
                AttachClaim::Resumed
            }
            Some(Slot::Pending { .. }) => AttachClaim::AlreadyPending,
            None => {
                slots.insert(device_id.to_string(), Slot::Pending { cancelled: false });
                AttachClaim::Claimed
            }
        }
    }

    /// Drop a pending slot after a failed attach
    ///
    /// Returns true if a detach had cancelled the attach meanwhile.
    pub fn abandon_attach(&self, device_id: &str) -> bool {
        let mut slots = self.slots();
        match slots.get(device_id) {
            Some(Slot::Pending { cancelled }) => {
                let cancelled = *cancelled;
                slots.remove(device_id);
                cancelled
            }
            _ => false,
        }
    }

    /// Drop the pending slot for `device_id` if a detach has cancelled it
    ///
    /// Returns true if the slot was dropped. Check and removal happen under
    /// one lock, so a concurrent re-attach either revokes the cancellation
    /// first or finds the slot gone and claims a new one.
    pub fn finish_if_cancelled(&self, device_id: &str) -> bool {
        let mut slots = self.slots();
        if matches!(slots.get(device_id), Some(Slot::Pending { cancelled: true })) {
            slots.remove(device_id);
            return true;
        }
        false
    }

    /// Whether a detach has cancelled the pending attach for `device_id`
    pub fn is_cancelled(&self, device_id: &str) -> bool {
        matches!(
            self.slots().get(device_id),
            Some(Slot::Pending { cancelled: true })
        )
    }

    /// Turn the pending slot into an active session
    pub fn commit(&self, session: DeviceSession) -> CommitOutcome {
        let mut slots = self.slots();
        match slots.get(session.device_id()) {
            Some(Slot::Pending { cancelled: false }) => {
                slots.insert(session.device_id().to_string(), Slot::Active(session));
                CommitOutcome::Registered
            }
            Some(Slot::Pending { cancelled: true }) => {
                slots.remove(session.device_id());
                CommitOutcome::Cancelled(session)
            }
            // The slot was drained (shutdown) or never claimed
            _ => CommitOutcome::Cancelled(session),
        }
    }

    /// Remove the session for `device_id`, or cancel its pending attach
    pub fn take(&self, device_id: &str) -> DetachOutcome {
        let mut slots = self.slots();
        if let Some(Slot::Pending { cancelled }) = slots.get_mut(device_id) {
            *cancelled = true;
            return DetachOutcome::CancelledPending;
        }

        match slots.remove(device_id) {
            Some(Slot::Active(session)) => DetachOutcome::Removed(session),
            _ => DetachOutcome::Absent,
        }
    }

    /// Whether `device_id` has an active session
    pub fn contains(&self, device_id: &str) -> bool {
        matches!(self.slots().get(device_id), Some(Slot::Active(_)))
    }

    /// Whether `device_id` has an attach in progress
    pub fn is_pending(&self, device_id: &str) -> bool {
        matches!(self.slots().get(device_id), Some(Slot::Pending { .. }))
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of active sessions
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of every tracked device: active, or pending and not cancelled
    pub fn tracked_ids(&self) -> HashSet<String> {
        self.slots()
            .iter()
            .filter(|(_, slot)| !matches!(slot, Slot::Pending { cancelled: true }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ports of active sessions
    pub fn ports(&self) -> Vec<u16> {
        self.slots()
            .values()
            .filter_map(|slot| match slot {
                Slot::Active(session) => Some(session.tcp_port()),
                Slot::Pending { .. } => None,
            })
            .collect()
    }

    /// Serializable views of active sessions, ordered by device id
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .slots()
            .values()
            .filter_map(|slot| match slot {
                Slot::Active(session) => Some(session.snapshot()),
                Slot::Pending { .. } => None,
            })
            .collect();
        sessions.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        sessions
    }

    /// Remove every active session and cancel every pending attach
    pub fn drain(&self) -> Vec<DeviceSession> {
        let mut slots = self.slots();
        let mut drained = Vec::new();
        for (_, slot) in slots.drain() {
            if let Slot::Active(session) = slot {
                drained.push(session);
            }
        }
        drained
    }
}
