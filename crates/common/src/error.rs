//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The adb server answered a request with FAIL
    #[error("ADB error: {0}")]
    Adb(String),

    /// The connection to the device-management backend went away
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the event stream's transport is gone and
    /// the subscription must be recreated
    pub fn is_connection_closed(&self) -> bool {
        use std::io::ErrorKind;

        let io_closed = |e: &std::io::Error| {
            matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            )
        };

        match self {
            Self::ConnectionClosed(_) => true,
            Self::Io(e) => io_closed(e),
            Self::Protocol(protocol::ProtocolError::Io(e)) => io_closed(e),
            other => other
                .to_string()
                .to_ascii_lowercase()
                .contains("connection closed"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
