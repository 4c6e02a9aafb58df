//! [`RelayServer`] – WebSocket front door of the relay.
//!
//! Listens on `127.0.0.1:8765` by default.  Every accepted TCP connection is
//! upgraded to a WebSocket and handed to a fresh [`DownstreamSession`] on its
//! own thread, so each consumer gets its own set of upstream connectors.
//!
//! The accept loop polls a non-blocking listener and sleeps on the shutdown
//! signal between polls.  Once the signal is raised no new connections are
//! accepted and [`RelayServer::run`] joins every session thread before
//! returning.

use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use roverlink_middleware::{StopSignal, Transport, ws};
use roverlink_runtime::{DownstreamSession, SessionConfig};
use roverlink_types::RelayError;
use tracing::{debug, info, warn};

/// Default listen address for downstream consumers.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8765";

/// Wait between accept polls while no client is connecting.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bound on the WebSocket upgrade request of a new client.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// Accepts downstream consumers and runs one session per connection.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use roverlink_middleware::{StopSignal, WsTransport};
/// use roverlink_runtime::SessionConfig;
/// use roverlink_server::RelayServer;
///
/// let shutdown = StopSignal::new();
/// let server = RelayServer::bind(
///     "127.0.0.1:8765",
///     SessionConfig::default(),
///     Arc::new(WsTransport),
///     shutdown.clone(),
/// )
/// .expect("bind");
/// server.run().expect("relay server failed");
/// ```
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    session_config: SessionConfig,
    transport: Arc<dyn Transport>,
    shutdown: StopSignal,
}

impl RelayServer {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] if the address cannot be bound.
    pub fn bind(
        addr: impl ToSocketAddrs + fmt::Display,
        session_config: SessionConfig,
        transport: Arc<dyn Transport>,
        shutdown: StopSignal,
    ) -> Result<Self, RelayError> {
        let bind_error = |e: std::io::Error| RelayError::Transport {
            uri: addr.to_string(),
            details: format!("bind failed: {e}"),
        };
        let listener = TcpListener::bind(&addr).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;

        Ok(Self {
            listener,
            local_addr,
            session_config,
            transport,
            shutdown,
        })
    }

    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept consumers until shutdown, then wait for every session to end.
    ///
    /// Returns the number of sessions started.
    ///
    /// # Errors
    ///
    /// Accept and spawn failures are logged and do not end the loop; the
    /// `Result` is kept for callers that treat the server like any other
    /// fallible component.
    pub fn run(self) -> Result<u64, RelayError> {
        info!(addr = %self.local_addr, "relay listening");

        let mut sessions: Vec<JoinHandle<()>> = Vec::new();
        let mut started = 0u64;

        while !self.shutdown.is_set() {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.spawn_session(stream, peer, started + 1) {
                    Ok(handle) => {
                        started += 1;
                        sessions.push(handle);
                    }
                    Err(e) => warn!(%peer, error = %e, "could not start session"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.shutdown.wait_timeout(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    self.shutdown.wait_timeout(ACCEPT_POLL_INTERVAL);
                }
            }
            reap_finished(&mut sessions);
        }

        info!(active = sessions.len(), "shutting down; waiting for sessions");
        for handle in sessions {
            if handle.join().is_err() {
                warn!("session thread panicked");
            }
        }
        info!(sessions = started, "relay stopped");
        Ok(started)
    }

    fn spawn_session(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        number: u64,
    ) -> Result<JoinHandle<()>, RelayError> {
        let config = self.session_config.clone();
        let transport = Arc::clone(&self.transport);
        let shutdown = self.shutdown.clone();
        thread::Builder::new()
            .name(format!("session-{number}"))
            .spawn(move || handle_connection(stream, peer, &config, transport, shutdown))
            .map_err(|e| RelayError::Spawn(e.to_string()))
    }
}

impl fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServer")
            .field("local_addr", &self.local_addr)
            .field("session_config", &self.session_config)
            .finish()
    }
}

/// Join session threads that have already exited.
fn reap_finished(sessions: &mut Vec<JoinHandle<()>>) {
    let mut index = 0;
    while index < sessions.len() {
        if sessions[index].is_finished() {
            if sessions.swap_remove(index).join().is_err() {
                warn!("session thread panicked");
            }
        } else {
            index += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: &SessionConfig,
    transport: Arc<dyn Transport>,
    shutdown: StopSignal,
) {
    debug!(%peer, "consumer connected");

    let prepared = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)));
    if let Err(e) = prepared {
        warn!(%peer, error = %e, "could not configure consumer socket");
        return;
    }

    let mut downstream = match ws::accept(stream) {
        Ok(conn) => conn,
        Err(e) => {
            warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };

    let session = DownstreamSession::new(config, transport, shutdown);
    info!(%peer, session = %session.id(), "session accepted");
    if let Err(e) = session.run(&mut downstream) {
        warn!(%peer, error = %e, "session ended with error");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
