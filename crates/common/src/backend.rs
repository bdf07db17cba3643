//! Device-management backend seam
//!
//! The daemon consumes the backend (an adb server in production) only
//! through these traits: an event subscription, bridge creation, and shell
//! command execution for attribute probing.

use crate::Subscription;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Callback deciding whether a client presenting `public_key` may connect
pub type AuthCallback = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Authorization applied to clients connecting to a bridge
#[derive(Clone, Default)]
pub enum BridgeAuth {
    /// Accept every client without an AUTH exchange
    #[default]
    AutoApprove,
    /// Run the AUTH exchange and hand the client's public key to the callback
    Verify(AuthCallback),
}

impl fmt::Debug for BridgeAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoApprove => f.write_str("AutoApprove"),
            Self::Verify(_) => f.write_str("Verify(..)"),
        }
    }
}

/// A network-to-device bridge
///
/// Created idle by [`DeviceBackend::create_bridge`]; starts serving once
/// [`listen`](BridgeHandle::listen) succeeds.
#[async_trait]
pub trait BridgeHandle: Send + Sync {
    /// Start accepting connections on `port`
    async fn listen(&mut self, port: u16) -> crate::Result<()>;

    /// Stop the listener and every live connection. Idempotent.
    fn close(&mut self);

    /// Port the bridge is listening on, if any
    fn port(&self) -> Option<u16>;
}

/// Capabilities consumed from the device-management backend
#[async_trait]
pub trait DeviceBackend: Send + Sync + 'static {
    /// Subscribe to attach/detach/error/end signals
    ///
    /// `known` lists devices the caller already tracks, so a fresh
    /// subscription can report the ones that vanished meanwhile.
    async fn track_devices(&self, known: HashSet<String>) -> crate::Result<Subscription>;

    /// Create an idle bridge for `device_id`
    async fn create_bridge(
        &self,
        device_id: &str,
        auth: BridgeAuth,
    ) -> crate::Result<Box<dyn BridgeHandle>>;

    /// Run a shell command on the device and return its raw output
    async fn shell(&self, device_id: &str, command: &str) -> crate::Result<String>;
}
