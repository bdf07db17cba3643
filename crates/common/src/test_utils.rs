//! Test utilities for usb-tcp-bridge
//!
//! Provides a scripted [`DeviceBackend`] and helper functions for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockBackend, MEMINFO_6GB};
//!
//! let backend = MockBackend::new().with_android("13", MEMINFO_6GB);
//! assert_eq!(backend.subscription_count(), 0);
//! ```

use crate::backend::{BridgeAuth, BridgeHandle, DeviceBackend};
use crate::channel::{DeviceSignal, SignalSender, Subscription, create_signal_channel};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub use protocol::shell::{MEMINFO_COMMAND, PACKAGES_COMMAND, VERSION_COMMAND};

/// A `/proc/meminfo` excerpt reporting 6005384 kB of RAM
pub const MEMINFO_6GB: &str = "MemTotal:        6005384 kB\nMemFree:          123456 kB\n";

/// Run a future with a timeout
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Poll `condition` every 10ms until it holds or [`DEFAULT_TEST_TIMEOUT`] elapses
///
/// Returns whether the condition was met.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[derive(Default)]
struct MockState {
    subscriptions: Vec<SignalSender>,
    known_sets: Vec<HashSet<String>>,
    track_failures: usize,
    bridge_failures: HashSet<String>,
    listen_failures: usize,
    bridge_delay: Option<Duration>,
    opened: Vec<String>,
    listened: Vec<(String, u16)>,
    closed: Vec<(String, Option<u16>)>,
    shell_calls: Vec<(String, String)>,
    shell_outputs: HashMap<String, String>,
}

/// Scripted device-management backend
///
/// Clones share state, so a test can hand one clone to the daemon and keep
/// another to inject signals and inspect recorded calls.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script the version and meminfo probes
    pub fn with_android(self, version: &str, meminfo: &str) -> Self {
        self.set_shell_output(VERSION_COMMAND, &format!("{}\n", version));
        self.set_shell_output(MEMINFO_COMMAND, meminfo);
        self
    }

    /// Script the output of a shell command; unscripted commands fail
    pub fn set_shell_output(&self, command: &str, output: &str) {
        self.state()
            .shell_outputs
            .insert(command.to_string(), output.to_string());
    }

    /// Make every shell command fail
    pub fn clear_shell_outputs(&self) {
        self.state().shell_outputs.clear();
    }

    /// Make the next `count` subscription attempts fail
    pub fn fail_next_tracks(&self, count: usize) {
        self.state().track_failures = count;
    }

    /// Make bridge creation fail for `device_id`
    pub fn fail_bridge_for(&self, device_id: &str) {
        self.state().bridge_failures.insert(device_id.to_string());
    }

    /// Make the next `count` listen calls fail as if the port were taken
    pub fn fail_next_listens(&self, count: usize) {
        self.state().listen_failures = count;
    }

    /// Delay bridge creation, widening the attach window
    pub fn set_bridge_delay(&self, delay: Duration) {
        self.state().bridge_delay = Some(delay);
    }

    /// Push a signal into the most recent subscription
    ///
    /// Returns false when there is no live subscription.
    pub async fn emit(&self, signal: DeviceSignal) -> bool {
        let sender = self.state().subscriptions.last().cloned();
        match sender {
            Some(sender) => sender.send(signal).await.is_ok(),
            None => false,
        }
    }

    pub async fn attach(&self, device_id: &str) -> bool {
        self.emit(DeviceSignal::Attach {
            device_id: device_id.to_string(),
        })
        .await
    }

    pub async fn detach(&self, device_id: &str) -> bool {
        self.emit(DeviceSignal::Detach {
            device_id: device_id.to_string(),
        })
        .await
    }

    /// Number of successful `track_devices` calls
    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    /// `known` sets passed to each successful `track_devices` call
    pub fn known_sets(&self) -> Vec<HashSet<String>> {
        self.state().known_sets.clone()
    }

    /// Device ids for which a bridge was created
    pub fn opened_bridges(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    /// (device id, port) for every successful listen
    pub fn listened(&self) -> Vec<(String, u16)> {
        self.state().listened.clone()
    }

    /// (device id, port) for every bridge close, in order
    pub fn closed_bridges(&self) -> Vec<(String, Option<u16>)> {
        self.state().closed.clone()
    }

    /// (device id, command) for every shell call
    pub fn shell_calls(&self) -> Vec<(String, String)> {
        self.state().shell_calls.clone()
    }
}

#[async_trait]
impl DeviceBackend for MockBackend {
    async fn track_devices(&self, known: HashSet<String>) -> crate::Result<Subscription> {
        let mut state = self.state();
        if state.track_failures > 0 {
            state.track_failures -= 1;
            return Err(crate::Error::Network("scripted track failure".into()));
        }

        let (tx, rx) = create_signal_channel();
        state.subscriptions.push(tx);
        state.known_sets.push(known);
        Ok(Subscription::new(rx, None))
    }

    async fn create_bridge(
        &self,
        device_id: &str,
        _auth: BridgeAuth,
    ) -> crate::Result<Box<dyn BridgeHandle>> {
        let delay = self.state().bridge_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.bridge_failures.contains(device_id) {
            return Err(crate::Error::Bridge(format!(
                "scripted bridge failure for {}",
                device_id
            )));
        }
        state.opened.push(device_id.to_string());

        Ok(Box::new(MockBridge {
            device_id: device_id.to_string(),
            port: None,
            closed: false,
            state: self.state.clone(),
        }))
    }

    async fn shell(&self, device_id: &str, command: &str) -> crate::Result<String> {
        let mut state = self.state();
        state
            .shell_calls
            .push((device_id.to_string(), command.to_string()));
        state
            .shell_outputs
            .get(command)
            .cloned()
            .ok_or_else(|| crate::Error::Adb(format!("no scripted output for '{}'", command)))
    }
}

/// Bridge handle returned by [`MockBackend`]
pub struct MockBridge {
    device_id: String,
    port: Option<u16>,
    closed: bool,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl BridgeHandle for MockBridge {
    async fn listen(&mut self, port: u16) -> crate::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.listen_failures > 0 {
            state.listen_failures -= 1;
            return Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "scripted address in use",
            )));
        }
        state.listened.push((self.device_id.clone(), port));
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closed
            .push((self.device_id.clone(), self.port));
    }

    fn port(&self) -> Option<u16> {
        self.port
    }
}

impl Drop for MockBridge {
    fn drop(&mut self) {
        self.close();
    }
}
