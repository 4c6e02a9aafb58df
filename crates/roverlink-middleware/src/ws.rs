//! Blocking WebSocket transport built on `tungstenite`.
//!
//! [`WsTransport`] opens client connections to upstream producers.
//! [`accept`] performs the server side of the handshake for downstream
//! consumers.  Both yield a [`WsConnection`], which implements
//! [`Connection`] by arming the socket's read timeout before every receive.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use tracing::debug;
use tungstenite::error::ProtocolError;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Error as WsError, Message, WebSocket};

use crate::transport::{Connection, Transport, TransportError, WireMessage};

/// Smallest read timeout handed to the OS; a zero timeout is rejected there.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Streams whose blocking reads can be bounded.
pub trait ReadTimeout {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;
}

impl ReadTimeout for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

impl ReadTimeout for MaybeTlsStream<TcpStream> {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        match self {
            MaybeTlsStream::Plain(stream) => stream.set_read_timeout(timeout),
            // TLS upstreams are not supported; reads stay unbounded.
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A WebSocket connection over any blocking stream.
pub struct WsConnection<S: Read + Write> {
    socket: WebSocket<S>,
    armed_timeout: Option<Duration>,
}

impl<S: Read + Write + ReadTimeout> WsConnection<S> {
    pub fn new(socket: WebSocket<S>) -> Self {
        Self {
            socket,
            armed_timeout: None,
        }
    }

    fn arm_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let timeout = timeout.max(MIN_READ_TIMEOUT);
        if self.armed_timeout != Some(timeout) {
            self.socket.get_ref().set_read_timeout(Some(timeout))?;
            self.armed_timeout = Some(timeout);
        }
        Ok(())
    }
}

impl<S: Read + Write + ReadTimeout + Send> Connection for WsConnection<S> {
    fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let message = match message {
            WireMessage::Text(text) => Message::text(text),
            WireMessage::Binary(bytes) => Message::binary(bytes),
        };
        self.socket.send(message).map_err(map_ws_error)
    }

    fn recv(&mut self, timeout: Duration) -> Result<WireMessage, TransportError> {
        self.arm_timeout(timeout)?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(WireMessage::Text(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => return Ok(WireMessage::Binary(bytes.to_vec())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "peer sent close frame");
                    return Err(TransportError::ClosedOk);
                }
                // Ping / pong / raw frames: tungstenite answers pings itself.
                Ok(_) => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout);
                    }
                }
                Err(e) => return Err(map_ws_error(e)),
            }
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

fn map_ws_error(error: WsError) -> TransportError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ClosedOk,
        WsError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            TransportError::Timeout
        }
        WsError::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            TransportError::ClosedError(e.to_string())
        }
        WsError::Io(e) => TransportError::Io(e),
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::ClosedError("reset without closing handshake".to_string())
        }
        other => TransportError::Protocol(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Client / server entry points
// ---------------------------------------------------------------------------

/// Client transport for `ws://` upstream endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn connect(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (socket, _response) = tungstenite::connect(uri).map_err(|e| match e {
            WsError::Io(io) if io.kind() == ErrorKind::ConnectionRefused => {
                TransportError::Refused(format!("{uri}: {io}"))
            }
            other => map_ws_error(other),
        })?;
        Ok(Box::new(WsConnection::new(socket)))
    }
}

/// Complete the server side of a WebSocket handshake on an accepted socket.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] when the peer's HTTP upgrade request
/// is invalid.
pub fn accept(stream: TcpStream) -> Result<WsConnection<TcpStream>, TransportError> {
    let socket = tungstenite::accept(stream)
        .map_err(|e| TransportError::Protocol(format!("handshake failed: {e}")))?;
    Ok(WsConnection::new(socket))
}
