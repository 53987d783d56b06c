//! TCP task client.
//!
//! Connects to a [`TaskServer`] and submits task payloads remotely over one
//! persistent connection. Requests are sent sequentially; every request
//! carries a fresh id and the server echoes it back, so a mismatched reply
//! is detected rather than silently attributed to the wrong request.
//!
//! [`TaskServer`]: super::TaskServer

use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};

use super::protocol::{read_message, write_message, Message, MessageKind, ProtocolError};

/// Client-side failures.
#[derive(Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// `connect()` has not been called (or `disconnect()` was).
    NotConnected,
    Io(io::Error),
    Protocol(ProtocolError),
    /// The server reported a task failure; carries the ERROR payload.
    Remote(String),
    /// The server closed the connection before replying.
    ConnectionClosed,
    /// The reply's id does not match the request.
    IdMismatch { expected: u32, got: u32 },
    /// The reply's kind makes no sense for the request.
    UnexpectedReply(MessageKind),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "client is not connected"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Remote(message) => write!(f, "server error: {message}"),
            Self::ConnectionClosed => write!(f, "server closed the connection"),
            Self::IdMismatch { expected, got } => {
                write!(f, "reply id {got} does not match request id {expected}")
            }
            Self::UnexpectedReply(kind) => write!(f, "unexpected reply kind {kind:?}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

/// Client for submitting task payloads to a remote executor.
pub struct TaskClient {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    next_id: AtomicU32,
}

impl TaskClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            next_id: AtomicU32::new(1),
        }
    }

    /// Establish the TCP connection. Call before `submit` or `ping`.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Submit a task payload and wait for the server's reply.
    ///
    /// Returns the result payload on success; a server-side task failure
    /// comes back as [`ClientError::Remote`].
    pub fn submit(&mut self, payload: &str) -> Result<String, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;

        let request = Message::new(MessageKind::Request, id, payload.as_bytes().to_vec());
        write_message(stream, &request)?;

        let reply = read_message(stream)?.ok_or(ClientError::ConnectionClosed)?;
        if reply.id != id {
            return Err(ClientError::IdMismatch {
                expected: id,
                got: reply.id,
            });
        }

        match reply.kind {
            MessageKind::Response => Ok(reply.payload_str().into_owned()),
            MessageKind::Error => Err(ClientError::Remote(reply.payload_str().into_owned())),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Liveness check: true when the server answers the ping with a
    /// matching pong.
    pub fn ping(&mut self) -> Result<bool, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;

        write_message(stream, &Message::new(MessageKind::Ping, id, Vec::new()))?;
        let reply = read_message(stream)?.ok_or(ClientError::ConnectionClosed)?;
        Ok(reply.kind == MessageKind::Pong && reply.id == id)
    }

    /// Close the connection. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for TaskClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_without_connect_fails() {
        let mut client = TaskClient::new("127.0.0.1", 1);
        assert!(matches!(
            client.submit("payload"),
            Err(ClientError::NotConnected)
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut client = TaskClient::new("127.0.0.1", 1);
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
    }
}
