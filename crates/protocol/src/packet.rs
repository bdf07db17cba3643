//! ADB transport packets
//!
//! The transport protocol spoken between an adb client and a device (or a
//! TCP bridge standing in for one). Every packet starts with a fixed header:
//!
//! ```text
//! [command: u32][arg0: u32][arg1: u32][data_length: u32][data_check: u32][magic: u32]
//! ```
//!
//! All fields are little-endian. `magic` is `command ^ 0xffffffff` and
//! `data_check` is the byte sum of the payload. Peers at protocol version
//! 0x01000001 and later may send a zero checksum, so a zero checksum is
//! accepted without verification.

use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};

#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the fixed packet header in bytes
pub const HEADER_SIZE: usize = 24;

/// Transport protocol version advertised in CNXN
pub const A_VERSION: u32 = 0x0100_0001;

/// Largest payload accepted from a peer (1 MiB)
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// Payload size offered by the bridge in its CNXN reply (256 KiB)
pub const DEFAULT_MAX_PAYLOAD: u32 = 256 * 1024;

/// AUTH packet subtypes (arg0)
pub const AUTH_TOKEN: u32 = 1;
pub const AUTH_SIGNATURE: u32 = 2;
pub const AUTH_RSAPUBLICKEY: u32 = 3;

/// Length of the random token sent in AUTH TOKEN packets
pub const AUTH_TOKEN_SIZE: usize = 20;

/// Transport command words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Sync,
    Cnxn,
    Auth,
    Open,
    Okay,
    Clse,
    Wrte,
    Stls,
}

impl Command {
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Sync => 0x434e_5953,
            Self::Cnxn => 0x4e58_4e43,
            Self::Auth => 0x4854_5541,
            Self::Open => 0x4e45_504f,
            Self::Okay => 0x5941_4b4f,
            Self::Clse => 0x4553_4c43,
            Self::Wrte => 0x4554_5257,
            Self::Stls => 0x534c_5453,
        }
    }

    pub fn from_u32(word: u32) -> Result<Self> {
        [
            Self::Sync,
            Self::Cnxn,
            Self::Auth,
            Self::Open,
            Self::Okay,
            Self::Clse,
            Self::Wrte,
            Self::Stls,
        ]
        .into_iter()
        .find(|c| c.as_u32() == word)
        .ok_or(ProtocolError::UnknownCommand(word))
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub data_length: u32,
    pub data_check: u32,
}

impl PacketHeader {
    /// Decode and validate a raw header
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Result<Self> {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);

        let command_word = word(0);
        let magic = word(20);
        if magic != command_word ^ 0xffff_ffff {
            return Err(ProtocolError::BadMagic {
                command: command_word,
            });
        }

        let header = Self {
            command: Command::from_u32(command_word)?,
            arg0: word(4),
            arg1: word(8),
            data_length: word(12),
            data_check: word(16),
        };

        if header.data_length as usize > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: header.data_length as usize,
                max: MAX_PAYLOAD,
            });
        }

        Ok(header)
    }
}

/// A complete transport packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload: payload.into(),
        }
    }

    /// CNXN(version, maxdata, "system-identity-string")
    pub fn connect(version: u32, max_payload: u32, banner: &str) -> Self {
        Self::new(Command::Cnxn, version, max_payload, null_terminated(banner))
    }

    /// AUTH(type, 0, data)
    pub fn auth(kind: u32, data: impl Into<Bytes>) -> Self {
        Self::new(Command::Auth, kind, 0, data)
    }

    /// OPEN(local-id, 0, "destination")
    pub fn open(local_id: u32, destination: &str) -> Self {
        Self::new(Command::Open, local_id, 0, null_terminated(destination))
    }

    /// OKAY(local-id, remote-id, "")
    pub fn okay(local_id: u32, remote_id: u32) -> Self {
        Self::new(Command::Okay, local_id, remote_id, Bytes::new())
    }

    /// WRTE(local-id, remote-id, data)
    pub fn write(local_id: u32, remote_id: u32, data: impl Into<Bytes>) -> Self {
        Self::new(Command::Wrte, local_id, remote_id, data)
    }

    /// CLSE(local-id, remote-id, "")
    pub fn close(local_id: u32, remote_id: u32) -> Self {
        Self::new(Command::Clse, local_id, remote_id, Bytes::new())
    }

    /// Payload interpreted as a null-terminated string
    pub fn payload_str(&self) -> Result<&str> {
        let end = self
            .payload
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.payload.len());
        std::str::from_utf8(&self.payload[..end]).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Encode header and payload into a single buffer
    pub fn encode(&self) -> Result<BytesMut> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD,
            });
        }

        let command = self.command.as_u32();
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + len);
        buf.put_u32_le(command);
        buf.put_u32_le(self.arg0);
        buf.put_u32_le(self.arg1);
        buf.put_u32_le(len as u32);
        buf.put_u32_le(checksum(&self.payload));
        buf.put_u32_le(command ^ 0xffff_ffff);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decode a packet from a buffer holding at least one full packet
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&buf[..HEADER_SIZE]);
        let header = PacketHeader::decode(&raw)?;

        let total = HEADER_SIZE + header.data_length as usize;
        if buf.len() < total {
            return Err(ProtocolError::IncompletePacket {
                expected: total,
                actual: buf.len(),
            });
        }

        Self::from_parts(header, Bytes::copy_from_slice(&buf[HEADER_SIZE..total]))
    }

    fn from_parts(header: PacketHeader, payload: Bytes) -> Result<Self> {
        if header.data_check != 0 {
            let actual = checksum(&payload);
            if actual != header.data_check {
                return Err(ProtocolError::ChecksumMismatch {
                    expected: header.data_check,
                    actual,
                });
            }
        }

        Ok(Self {
            command: header.command,
            arg0: header.arg0,
            arg1: header.arg1,
            payload,
        })
    }
}

/// Byte sum of a payload, as used in the `data_check` field
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |sum, b| sum.wrapping_add(u32::from(*b)))
}

fn null_terminated(s: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(s.len() + 1);
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

/// Read one packet from an async reader
#[cfg(feature = "async")]
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw).await?;
    let header = PacketHeader::decode(&raw)?;

    let mut payload = vec![0u8; header.data_length as usize];
    reader.read_exact(&mut payload).await?;
    Packet::from_parts(header, Bytes::from(payload))
}

/// Write one packet to an async writer
#[cfg(feature = "async")]
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> Result<()> {
    let buf = packet.encode()?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
