//! ADB host ("smart socket") protocol
//!
//! Requests to the adb server and most of its replies are framed with a
//! four-digit hex length prefix:
//!
//! ```text
//! [Length: 4 ASCII hex digits][payload]
//! ```
//!
//! Every request is answered with a four-byte status word, `OKAY` or `FAIL`.
//! A `FAIL` is followed by a length-prefixed error message.

use crate::error::{ProtocolError, Result};
use std::fmt;

#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload representable by the four hex digit prefix
pub const MAX_REQUEST_SIZE: usize = 0xffff;

/// Status word sent by the adb server after a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Okay,
    Fail,
}

/// Encode a host request with its hex length prefix
///
/// # Example
/// ```
/// use protocol::host::encode_request;
///
/// let bytes = encode_request("host:version").unwrap();
/// assert_eq!(&bytes, b"000chost:version");
/// ```
pub fn encode_request(request: &str) -> Result<Vec<u8>> {
    let len = request.len();
    if len > MAX_REQUEST_SIZE {
        return Err(ProtocolError::RequestTooLarge {
            size: len,
            max: MAX_REQUEST_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(format!("{:04x}", len).as_bytes());
    frame.extend_from_slice(request.as_bytes());
    Ok(frame)
}

/// Parse a four hex digit length prefix
pub fn parse_length(prefix: &[u8; 4]) -> Result<usize> {
    let text = std::str::from_utf8(prefix)
        .map_err(|_| ProtocolError::InvalidLength(String::from_utf8_lossy(prefix).into_owned()))?;
    usize::from_str_radix(text, 16).map_err(|_| ProtocolError::InvalidLength(text.to_string()))
}

/// Parse a four byte status word
pub fn parse_status(word: &[u8; 4]) -> Result<Status> {
    match word {
        b"OKAY" => Ok(Status::Okay),
        b"FAIL" => Ok(Status::Fail),
        other => Err(ProtocolError::UnexpectedStatus(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

/// Connection state of a device as reported by `host:track-devices`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Device,
    Offline,
    Unauthorized,
    Authorizing,
    Connecting,
    Recovery,
    Sideload,
    Bootloader,
    Host,
    NoPermissions,
    Unknown(String),
}

impl DeviceState {
    fn parse(raw: &str) -> Self {
        match raw {
            "device" => Self::Device,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            "authorizing" => Self::Authorizing,
            "connecting" => Self::Connecting,
            "recovery" => Self::Recovery,
            "sideload" => Self::Sideload,
            "bootloader" => Self::Bootloader,
            "host" => Self::Host,
            s if s.starts_with("no permissions") => Self::NoPermissions,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the device accepts transport and shell requests
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Device)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Device => "device",
            Self::Offline => "offline",
            Self::Unauthorized => "unauthorized",
            Self::Authorizing => "authorizing",
            Self::Connecting => "connecting",
            Self::Recovery => "recovery",
            Self::Sideload => "sideload",
            Self::Bootloader => "bootloader",
            Self::Host => "host",
            Self::NoPermissions => "no permissions",
            Self::Unknown(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

/// One line of a device list snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: DeviceState,
}

/// Parse the payload of a `host:devices` / `host:track-devices` reply
///
/// Each line is `<serial>\t<state>`. Blank lines are ignored.
///
/// # Example
/// ```
/// use protocol::host::{parse_device_list, DeviceState};
///
/// let devices = parse_device_list("emulator-5554\tdevice\nR58M\tunauthorized\n").unwrap();
/// assert_eq!(devices.len(), 2);
/// assert_eq!(devices[0].state, DeviceState::Device);
/// ```
pub fn parse_device_list(payload: &str) -> Result<Vec<DeviceEntry>> {
    payload
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (serial, state) = line
                .split_once('\t')
                .ok_or_else(|| ProtocolError::MalformedDeviceLine(line.to_string()))?;
            if serial.is_empty() {
                return Err(ProtocolError::MalformedDeviceLine(line.to_string()));
            }
            Ok(DeviceEntry {
                serial: serial.to_string(),
                state: DeviceState::parse(state.trim()),
            })
        })
        .collect()
}

/// Write a host request to an async writer
#[cfg(feature = "async")]
pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &str) -> Result<()> {
    let frame = encode_request(request)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a status word; a `FAIL` is returned together with its message
#[cfg(feature = "async")]
pub async fn read_status<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<std::result::Result<(), String>> {
    let mut word = [0u8; 4];
    reader.read_exact(&mut word).await?;
    match parse_status(&word)? {
        Status::Okay => Ok(Ok(())),
        Status::Fail => {
            let message = read_string(reader).await?;
            Ok(Err(message))
        }
    }
}

/// Read a hex length prefixed payload
#[cfg(feature = "async")]
pub async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let len = parse_length(&prefix)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Read a hex length prefixed UTF-8 string
#[cfg(feature = "async")]
pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let payload = read_payload(reader).await?;
    String::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_prefix() {
        let bytes = encode_request("host:track-devices").unwrap();
        assert_eq!(&bytes[..4], b"0012");
        assert_eq!(&bytes[4..], b"host:track-devices");
    }

    #[test]
    fn test_encode_request_too_large() {
        let request = "x".repeat(MAX_REQUEST_SIZE + 1);
        assert!(matches!(
            encode_request(&request),
            Err(ProtocolError::RequestTooLarge { .. })
        ));
    }

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length(b"001f").unwrap(), 31);
        assert_eq!(parse_length(b"0000").unwrap(), 0);
        assert!(parse_length(b"zz00").is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(b"OKAY").unwrap(), Status::Okay);
        assert_eq!(parse_status(b"FAIL").unwrap(), Status::Fail);
        assert!(parse_status(b"WHAT").is_err());
    }

    #[test]
    fn test_parse_device_list_states() {
        let payload = "a\tdevice\nb\toffline\nc\tno permissions (user in plugdev group)\nd\tweird\n\n";
        let devices = parse_device_list(payload).unwrap();
        assert_eq!(devices.len(), 4);
        assert!(devices[0].state.is_online());
        assert_eq!(devices[1].state, DeviceState::Offline);
        assert_eq!(devices[2].state, DeviceState::NoPermissions);
        assert_eq!(devices[3].state, DeviceState::Unknown("weird".to_string()));
    }

    #[test]
    fn test_parse_device_list_empty() {
        assert!(parse_device_list("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_device_list_malformed() {
        assert!(matches!(
            parse_device_list("no-tab-here\n"),
            Err(ProtocolError::MalformedDeviceLine(_))
        ));
    }

    #[tokio::test]
    async fn test_read_status_fail_message() {
        let mut reader: &[u8] = b"FAIL000edevice offline";
        let status = read_status(&mut reader).await.unwrap();
        assert_eq!(status, Err("device offline".to_string()));
    }

    #[tokio::test]
    async fn test_read_payload() {
        let mut reader: &[u8] = b"0010emulator-5554\tdevice";
        let payload = read_string(&mut reader).await.unwrap();
        assert_eq!(payload, "emulator-5554\tde");
    }
}
