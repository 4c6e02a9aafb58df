//! In-process transport for simulation and tests.
//!
//! [`MemoryTransport`] keeps a table of bound URIs.  Binding a URI yields a
//! [`MemoryListener`] standing in for the upstream producer; connecting to a
//! URI that is not bound (or whose listener was dropped) is refused, exactly
//! like a TCP connect to a port nobody listens on.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use roverlink_middleware::memory::MemoryTransport;
//! use roverlink_middleware::transport::{Connection, Transport, WireMessage};
//!
//! let transport = MemoryTransport::new();
//! assert!(transport.connect("mem://car/telemetry").is_err());
//!
//! let listener = transport.bind("mem://car/telemetry");
//! let mut client = transport.connect("mem://car/telemetry").unwrap();
//! let mut peer = listener.accept_timeout(Duration::from_secs(1)).unwrap();
//!
//! peer.send(WireMessage::Text("{}".into())).unwrap();
//! assert_eq!(client.recv(Duration::from_secs(1)).unwrap(), WireMessage::Text("{}".into()));
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::transport::{Connection, Transport, TransportError, WireMessage};

/// One end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    tx: Option<Sender<WireMessage>>,
    rx: Receiver<WireMessage>,
}

/// Create two connected ends.
pub fn pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();
    (
        MemoryConnection {
            tx: Some(a_tx),
            rx: b_rx,
        },
        MemoryConnection {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

impl Connection for MemoryConnection {
    fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(message).map_err(|_| TransportError::ClosedOk),
            None => Err(TransportError::ClosedOk),
        }
    }

    fn recv(&mut self, timeout: Duration) -> Result<WireMessage, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ClosedOk),
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// Accepts connections made to one bound URI.
#[derive(Debug)]
pub struct MemoryListener {
    uri: String,
    incoming: Receiver<MemoryConnection>,
}

impl MemoryListener {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Wait up to `timeout` for the next client.
    pub fn accept_timeout(&self, timeout: Duration) -> Option<MemoryConnection> {
        self.incoming.recv_timeout(timeout).ok()
    }
}

/// Table of in-process endpoints.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    listeners: Mutex<HashMap<String, Sender<MemoryConnection>>>,
    attempts: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `uri` reachable.  Any earlier listener for the same URI stops
    /// receiving connections.
    pub fn bind(&self, uri: &str) -> MemoryListener {
        let (tx, rx) = mpsc::channel();
        self.lock().insert(uri.to_string(), tx);
        MemoryListener {
            uri: uri.to_string(),
            incoming: rx,
        }
    }

    /// Make `uri` unreachable.  Established connections are unaffected.
    pub fn unbind(&self, uri: &str) {
        self.lock().remove(uri);
    }

    /// Number of `connect` calls so far, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Sender<MemoryConnection>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut listeners = self.lock();
        let Some(incoming) = listeners.get(uri) else {
            return Err(TransportError::Refused(format!("{uri}: nothing bound")));
        };

        let (client, server) = pair();
        if incoming.send(server).is_err() {
            // Listener dropped without unbinding.
            listeners.remove(uri);
            return Err(TransportError::Refused(format!("{uri}: listener gone")));
        }
        Ok(Box::new(client))
    }
}
