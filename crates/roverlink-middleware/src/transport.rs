//! The transport seam.
//!
//! The relay never talks to a socket library directly.  Connectors and
//! sessions only see the [`Transport`] and [`Connection`] traits, so the
//! WebSocket client ([`WsTransport`][crate::ws::WsTransport]) and the
//! in-process simulation ([`MemoryTransport`][crate::memory::MemoryTransport])
//! are interchangeable.

use std::fmt;
use std::io;
use std::time::Duration;

use roverlink_types::RelayError;
use thiserror::Error;

/// One message on a connection: a text frame or a binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    /// Payload bytes regardless of the frame kind.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            WireMessage::Text(text) => text.into_bytes(),
            WireMessage::Binary(bytes) => bytes,
        }
    }

    /// Payload as text; binary payloads are decoded lossily.
    pub fn into_text(self) -> String {
        match self {
            WireMessage::Text(text) => text,
            WireMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Failures reported by a [`Transport`] or [`Connection`].
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out")]
    Timeout,

    /// The peer closed the connection with a close handshake.
    #[error("connection closed")]
    ClosedOk,

    /// The connection ended without a clean close handshake.
    #[error("connection closed with error: {0}")]
    ClosedError(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// `true` when the connection can no longer carry messages.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::ClosedOk | TransportError::ClosedError(_))
    }

    pub fn into_relay_error(self, uri: &str) -> RelayError {
        RelayError::Transport {
            uri: uri.to_string(),
            details: self.to_string(),
        }
    }
}

/// An established, bidirectional message connection.
///
/// # Contract
///
/// * `send` – transmit one message.  A closed peer is reported as
///   [`TransportError::ClosedOk`] or [`TransportError::ClosedError`].
///
/// * `recv` – wait at most `timeout` for the next data message.  Control
///   frames (ping/pong) are handled internally and never returned.  An
///   expired wait is [`TransportError::Timeout`].
///
/// * `close` – start an orderly close.  Errors are swallowed because the
///   connection is being discarded anyway.
pub trait Connection: Send {
    fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    fn recv(&mut self, timeout: Duration) -> Result<WireMessage, TransportError>;

    fn close(&mut self);
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Connection")
    }
}

/// Factory for outbound connections.
///
/// `connect` has no inherent timeout; it returns when the OS reports success
/// or failure.
pub trait Transport: Send + Sync {
    fn connect(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError>;
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transport")
    }
}
