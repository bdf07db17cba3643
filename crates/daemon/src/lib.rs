//! usb-tcp-bridge daemon
//!
//! Watches the adb server for Android devices attaching over USB and gives
//! each one a TCP endpoint that adb clients on the network can connect to.
//! Every bridge is reported to an external collector when it comes up and
//! when it goes away.
//!
//! The moving parts, from the bottom up:
//!
//! - [`allocator`] hands out unique bridge ports
//! - [`probe`] reads the attributes carried in connect reports
//! - [`reporter`] delivers lifecycle reports over HTTP
//! - [`registry`] records which devices are bridged, and where
//! - [`lifecycle`] turns attach and detach signals into bridge sessions
//! - [`supervisor`] owns the device event stream and restarts it when the
//!   adb server drops it
//! - [`adb`] is the production backend behind all of the above

pub mod adb;
pub mod allocator;
pub mod config;
pub mod lifecycle;
pub mod probe;
pub mod registry;
pub mod reporter;
pub mod service;
pub mod supervisor;

pub use config::BridgeConfig;
pub use lifecycle::{AttachResult, BridgeController, DetachResult};
pub use registry::DeviceRegistry;
pub use supervisor::EventStreamSupervisor;
