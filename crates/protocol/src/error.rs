//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Host protocol length prefix was not four hex digits
    #[error("Invalid length prefix: {0:?}")]
    InvalidLength(String),

    /// Status word was neither OKAY nor FAIL
    #[error("Unexpected status: {0:?}")]
    UnexpectedStatus(String),

    /// Host request payload does not fit in a four hex digit prefix
    #[error("Request too large: {size} bytes (max: {max})")]
    RequestTooLarge { size: usize, max: usize },

    /// Packet magic does not match the command word
    #[error("Bad packet magic for command {command:#010x}")]
    BadMagic { command: u32 },

    /// Packet payload checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Unknown transport command word
    #[error("Unknown command: {0:#010x}")]
    UnknownCommand(u32),

    /// Packet payload exceeds maximum allowed size
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Buffer too small for operation
    #[error("Incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket { expected: usize, actual: usize },

    /// Device list line could not be parsed
    #[error("Malformed device list line: {0:?}")]
    MalformedDeviceLine(String),

    /// Payload was not valid UTF-8 where text was expected
    #[error("Invalid UTF-8 in payload")]
    InvalidUtf8,

    /// I/O error during frame operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
