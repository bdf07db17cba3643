//! ADB wire protocol for usb-tcp-bridge
//!
//! This crate defines the two wire formats the bridge daemon speaks:
//!
//! - the **host protocol** used to talk to the local adb server
//!   (hex length-prefixed requests, `OKAY`/`FAIL` status words and device
//!   list snapshots), see [`host`];
//! - the **transport protocol** used between an adb client and a device,
//!   which the TCP bridge serves on behalf of a USB-attached device, see
//!   [`packet`].
//!
//! [`shell`] holds the device shell commands used for attribute reads.
//!
//! # Example
//!
//! ```
//! use protocol::{Command, Packet};
//!
//! let packet = Packet::open(1, "shell:getprop ro.build.version.release");
//! let bytes = packet.encode().unwrap();
//! let decoded = Packet::decode(&bytes).unwrap();
//! assert_eq!(decoded.command, Command::Open);
//! ```

pub mod error;
pub mod host;
pub mod packet;
pub mod shell;

pub use error::{ProtocolError, Result};
pub use host::{DeviceEntry, DeviceState, Status, encode_request, parse_device_list};
pub use packet::{
    A_VERSION, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE, AUTH_TOKEN, AUTH_TOKEN_SIZE, Command,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAX_PAYLOAD, Packet, PacketHeader,
};

#[cfg(feature = "async")]
pub use packet::{read_packet, write_packet};
