//! Common utilities for usb-tcp-bridge
//!
//! This crate provides functionality shared by the daemon and its tests:
//! error handling, logging setup, the device-management backend seam, and
//! the ordered signal channel that carries attach/detach events.

pub mod backend;
pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use backend::{AuthCallback, BridgeAuth, BridgeHandle, DeviceBackend};
pub use channel::{
    DeviceSignal, SignalReceiver, SignalSender, Subscription, create_signal_channel,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
