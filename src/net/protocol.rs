//! Length-prefixed wire protocol for the task server.
//!
//! TCP delivers a byte stream with no message boundaries, so every message
//! is framed with a fixed 9-byte header followed by its payload:
//!
//! ```text
//! ┌──────────┬───────────────┬───────────────────┬─────────────────────┐
//! │  1 byte  │  4 bytes (BE) │   4 bytes (BE)    │  payload_len bytes  │
//! │   kind   │      id       │    payload_len    │       payload       │
//! └──────────┴───────────────┴───────────────────┴─────────────────────┘
//! ```
//!
//! The id is chosen by the client and echoed by the server, so a client can
//! match replies to requests. Integers are big-endian (network byte order).
//!
//! # Decode limits
//!
//! A frame claiming more than [`MAX_PAYLOAD_LEN`] bytes is rejected before
//! any payload allocation: a four-byte length field must not be able to
//! ask the receiver for 4 GiB.
//!
//! # Close semantics
//!
//! A peer closing the connection *between* frames is normal:
//! [`read_message`] returns `Ok(None)`. A close in the middle of a frame is
//! [`ProtocolError::Truncated`].

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};

/// Bytes in the fixed frame header: kind + id + payload length.
pub const HEADER_LEN: usize = 9;

/// Upper bound on a single frame's payload (64 MiB).
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// What a frame means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Client → server: run this task payload.
    Request = 0x01,
    /// Server → client: the task's result.
    Response = 0x02,
    /// Server → client: the task failed; payload carries the message.
    Error = 0x03,
    /// Client → server: liveness check.
    Ping = 0x04,
    /// Server → client: liveness reply.
    Pong = 0x05,
}

impl MessageKind {
    pub fn from_wire(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x01 => Ok(Self::Request),
            0x02 => Ok(Self::Response),
            0x03 => Ok(Self::Error),
            0x04 => Ok(Self::Ping),
            0x05 => Ok(Self::Pong),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// One framed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub id: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageKind, id: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            id,
            payload: payload.into(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Frame codec failures.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    Io(io::Error),
    /// The kind byte is not a defined message type.
    UnknownKind(u8),
    /// The header claims a payload above [`MAX_PAYLOAD_LEN`].
    PayloadTooLarge { len: u32 },
    /// The peer closed the connection mid-frame.
    Truncated,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::UnknownKind(byte) => write!(f, "unknown message kind 0x{byte:02x}"),
            Self::PayloadTooLarge { len } => {
                write!(f, "payload of {len} bytes exceeds the {MAX_PAYLOAD_LEN}-byte limit")
            }
            Self::Truncated => write!(f, "connection closed mid-frame"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Serialize a message into one contiguous buffer ready to send.
pub fn encode(msg: &Message) -> Vec<u8> {
    debug_assert!(msg.payload.len() <= MAX_PAYLOAD_LEN);

    let mut buf = Vec::with_capacity(HEADER_LEN + msg.payload.len());
    buf.push(msg.kind.to_wire());
    buf.extend_from_slice(&msg.id.to_be_bytes());
    buf.extend_from_slice(&(msg.payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&msg.payload);
    buf
}

/// Write one framed message. A single `write_all` keeps header and payload
/// in one syscall for small frames.
pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError> {
    writer.write_all(&encode(msg))?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message.
///
/// Returns `Ok(None)` on a clean close at a frame boundary. A close inside
/// a frame is `Err(Truncated)`; an unknown kind or oversize payload is
/// rejected without reading further.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Message>, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0usize;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(ProtocolError::Truncated)
            };
        }
        filled += n;
    }

    let kind = MessageKind::from_wire(header[0])?;
    let id = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    let payload_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);

    if payload_len as usize > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge { len: payload_len });
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::Io(err)
        }
    })?;

    Ok(Some(Message { kind, id, payload }))
}
