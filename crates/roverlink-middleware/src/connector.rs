//! [`UpstreamConnector`] – one persistent connection to one upstream
//! endpoint, kept alive by a dedicated worker thread.
//!
//! # Worker loop
//!
//! 1. **Connect** – call [`Transport::connect`].  On failure log, wait the
//!    fixed reconnect backoff, try again.  There is no retry limit and no
//!    exponential growth; only [`UpstreamConnector::stop`] ends the loop.
//! 2. **Pump** – while connected:
//!    * write modes drain the outbound [`FreshnessSlot`] and send the item;
//!    * read modes receive with a bounded wait and hand each message to the
//!      inbound slot under its overflow policy.
//!
//!    An orderly close, an erroring close and a receive timeout all end the
//!    pump and send the worker back to step 1.  A stalled peer therefore
//!    costs at most one receive timeout before a reconnect.
//! 3. **Stop** – [`UpstreamConnector::stop`] raises the [`StopSignal`] and
//!    joins the worker.  The worker checks the signal at the top of both
//!    loops and after every blocking call.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use roverlink_middleware::connector::{ConnectorConfig, UpstreamConnector};
//! use roverlink_middleware::ws::WsTransport;
//! use roverlink_types::{ConnectionMode, Endpoint};
//!
//! let mut telemetry = UpstreamConnector::new(
//!     "telemetry",
//!     Endpoint::new("ws://192.168.50.66/telemetry", ConnectionMode::Read),
//!     Arc::new(WsTransport),
//!     ConnectorConfig::default(),
//! );
//! telemetry.start().expect("spawn worker");
//! let frame = telemetry.recv().expect("started in read mode");
//! telemetry.stop();
//! # let _ = frame;
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use roverlink_types::{ConnectionState, Endpoint, OverflowPolicy, RelayError};
use tracing::{debug, info, info_span, warn};

use crate::signal::StopSignal;
use crate::slot::FreshnessSlot;
use crate::transport::{Connection, Transport, TransportError, WireMessage};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default wait between failed connection attempts.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Default bound on a single receive before the connection is considered lost.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest single blocking wait, bounding how late a stop request is
/// noticed.
const STOP_POLL_SLICE: Duration = Duration::from_millis(100);

/// Tuning knobs for one [`UpstreamConnector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub reconnect_backoff: Duration,
    pub recv_timeout: Duration,
    /// Policy of the slot that received messages are delivered into.
    pub inbound_policy: OverflowPolicy,
    /// Policy of the slot that [`UpstreamConnector::send`] writes into.
    pub outbound_policy: OverflowPolicy,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            inbound_policy: OverflowPolicy::DropNewest,
            outbound_policy: OverflowPolicy::BlockProducer,
        }
    }
}

/// Point-in-time view of a connector's health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorStatus {
    pub state: ConnectionState,
    /// Successful connects since start.
    pub connects: u64,
    /// Failed connect attempts since start.
    pub failed_attempts: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// UpstreamConnector
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the worker thread and both slots of one upstream connection.
///
/// Dropping the connector stops it.
pub struct UpstreamConnector {
    name: String,
    endpoint: Endpoint,
    config: ConnectorConfig,
    transport: Arc<dyn Transport>,
    inbound: Arc<FreshnessSlot<WireMessage>>,
    outbound: Arc<FreshnessSlot<WireMessage>>,
    status: Arc<Mutex<ConnectorStatus>>,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
    started: bool,
}

impl UpstreamConnector {
    /// Create a connector for `endpoint`.  Nothing happens until
    /// [`start`](Self::start).
    pub fn new(
        name: impl Into<String>,
        endpoint: Endpoint,
        transport: Arc<dyn Transport>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint,
            config,
            transport,
            inbound: Arc::new(FreshnessSlot::new(config.inbound_policy)),
            outbound: Arc::new(FreshnessSlot::new(config.outbound_policy)),
            status: Arc::new(Mutex::new(ConnectorStatus::default())),
            stop: StopSignal::new(),
            worker: None,
            started: false,
        }
    }

    /// Spawn the worker thread.
    ///
    /// Calling `start` again, including after [`stop`](Self::stop), is a
    /// no-op: a stopped connector stays stopped.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Spawn`] if the OS refuses to create the thread.
    pub fn start(&mut self) -> Result<(), RelayError> {
        if self.started {
            return Ok(());
        }

        let worker = Worker {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            config: self.config,
            transport: Arc::clone(&self.transport),
            inbound: Arc::clone(&self.inbound),
            outbound: Arc::clone(&self.outbound),
            status: Arc::clone(&self.status),
            stop: self.stop.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("upstream-{}", self.name))
            .spawn(move || worker.run())
            .map_err(|e| RelayError::Spawn(e.to_string()))?;

        self.worker = Some(handle);
        self.started = true;
        Ok(())
    }

    /// Stop the worker and wait for its thread to exit.
    ///
    /// Idempotent: later calls return immediately.
    pub fn stop(&mut self) {
        self.stop.set();
        if let Some(handle) = self.worker.take() {
            debug!(feed = %self.name, "stopping upstream connector");
            set_state(&self.status, ConnectionState::Closing);
            if handle.join().is_err() {
                warn!(feed = %self.name, "upstream worker panicked");
            }
        }
        set_state(&self.status, ConnectionState::Closed);
    }

    /// `true` when a received message is waiting.
    pub fn is_available(&self) -> bool {
        self.inbound.is_available()
    }

    /// Take the next received message, waiting for one.
    ///
    /// A message still pending when the connector is stopped can be taken
    /// afterwards; once the slot is empty the wait ends with
    /// [`RelayError::Stopped`].
    ///
    /// # Errors
    ///
    /// [`RelayError::NotStarted`] before [`start`](Self::start),
    /// [`RelayError::ModeMismatch`] on a write-only connector,
    /// [`RelayError::Stopped`] after [`stop`](Self::stop).
    pub fn recv(&self) -> Result<WireMessage, RelayError> {
        self.check("receive", self.endpoint.mode.reads())?;
        loop {
            if self.stop.is_set() {
                return self.inbound.try_get().ok_or_else(|| self.stopped());
            }
            if let Some(message) = self.inbound.get_timeout(STOP_POLL_SLICE) {
                return Ok(message);
            }
        }
    }

    /// Take the next received message if one is waiting.
    pub fn try_recv(&self) -> Option<WireMessage> {
        self.inbound.try_get()
    }

    /// Queue `message` for the upstream, waiting while the outbound slot is
    /// full when it uses [`OverflowPolicy::BlockProducer`].
    ///
    /// # Errors
    ///
    /// [`RelayError::NotStarted`] before [`start`](Self::start),
    /// [`RelayError::ModeMismatch`] on a read-only connector,
    /// [`RelayError::Stopped`] after [`stop`](Self::stop).
    pub fn send(&self, message: WireMessage) -> Result<(), RelayError> {
        self.check("send", self.endpoint.mode.writes())?;
        let mut message = message;
        loop {
            if self.stop.is_set() {
                return Err(self.stopped());
            }
            match self.outbound.put_timeout(message, STOP_POLL_SLICE) {
                Ok(()) => return Ok(()),
                Err(back) => message = back,
            }
        }
    }

    /// Like [`send`](Self::send) but waits at most `timeout` for room.
    ///
    /// Returns `Ok(Some(message))` with the message handed back when the slot
    /// stayed full.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`send`](Self::send).
    pub fn send_timeout(
        &self,
        message: WireMessage,
        timeout: Duration,
    ) -> Result<Option<WireMessage>, RelayError> {
        self.check("send", self.endpoint.mode.writes())?;
        if self.stop.is_set() {
            return Err(self.stopped());
        }
        Ok(self.outbound.put_timeout(message, timeout).err())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        lock_status(&self.status).state
    }

    pub fn status(&self) -> ConnectorStatus {
        lock_status(&self.status).clone()
    }

    fn check(&self, operation: &'static str, allowed: bool) -> Result<(), RelayError> {
        if !self.started {
            return Err(RelayError::NotStarted(self.endpoint.uri.clone()));
        }
        if !allowed {
            return Err(RelayError::ModeMismatch {
                uri: self.endpoint.uri.clone(),
                operation,
            });
        }
        Ok(())
    }

    fn stopped(&self) -> RelayError {
        RelayError::Stopped(self.endpoint.uri.clone())
    }
}

impl Drop for UpstreamConnector {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

struct Worker {
    name: String,
    endpoint: Endpoint,
    config: ConnectorConfig,
    transport: Arc<dyn Transport>,
    inbound: Arc<FreshnessSlot<WireMessage>>,
    outbound: Arc<FreshnessSlot<WireMessage>>,
    status: Arc<Mutex<ConnectorStatus>>,
    stop: StopSignal,
}

impl Worker {
    fn run(self) {
        let span = info_span!("upstream", feed = %self.name, uri = %self.endpoint.uri);
        let _entered = span.enter();
        debug!("upstream worker started");

        while !self.stop.is_set() {
            set_state(&self.status, ConnectionState::Connecting);
            let mut conn = match self.transport.connect(&self.endpoint.uri) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to connect to upstream");
                    self.record_failed_attempt();
                    if self.stop.wait_timeout(self.config.reconnect_backoff) {
                        break;
                    }
                    continue;
                }
            };

            self.record_connect();
            info!("upstream connected");

            self.pump(conn.as_mut());
            conn.close();

            if !self.stop.is_set() {
                set_state(&self.status, ConnectionState::Disconnected);
            }
        }

        debug!("upstream worker finished");
    }

    /// Move messages until the connection ends or the stop signal is raised.
    fn pump(&self, conn: &mut dyn Connection) {
        let mode = self.endpoint.mode;
        while !self.stop.is_set() {
            if mode.writes() {
                // A write-only connector has nothing else to wait on, so it
                // blocks on the slot instead of polling it.
                let pending = if mode.reads() {
                    self.outbound.try_get()
                } else {
                    self.outbound.get_timeout(STOP_POLL_SLICE)
                };
                if let Some(message) = pending {
                    match conn.send(message) {
                        Ok(()) => {}
                        Err(e) if e.is_closed() => {
                            info!(error = %e, "upstream connection closed; pending message dropped");
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "upstream send failed; pending message dropped");
                            return;
                        }
                    }
                }
                if self.stop.is_set() {
                    return;
                }
            }

            if mode.reads() {
                match self.receive(conn) {
                    Ok(Some(message)) => self.deliver(message),
                    Ok(None) => return,
                    Err(TransportError::ClosedOk) => {
                        info!("upstream connection closed");
                        return;
                    }
                    Err(TransportError::Timeout) => {
                        warn!(timeout = ?self.config.recv_timeout, "upstream timed out");
                        return;
                    }
                    Err(e) => {
                        info!(error = %e, "upstream connection closed with error");
                        return;
                    }
                }
            }
        }
    }

    /// Receive with the configured timeout, split into short waits so a
    /// stop request is seen promptly.  `Ok(None)` means the stop signal was
    /// raised while waiting.
    fn receive(&self, conn: &mut dyn Connection) -> Result<Option<WireMessage>, TransportError> {
        let deadline = Instant::now() + self.config.recv_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            match conn.recv(remaining.min(STOP_POLL_SLICE)) {
                Err(TransportError::Timeout) if self.stop.is_set() => return Ok(None),
                Err(TransportError::Timeout) => continue,
                other => return other.map(Some),
            }
        }
    }

    /// Hand a received message to the inbound slot without ignoring a stop
    /// request while a blocking slot stays full.
    fn deliver(&self, mut message: WireMessage) {
        loop {
            match self.inbound.put_timeout(message, self.config.recv_timeout) {
                Ok(()) => return,
                Err(returned) if !self.stop.is_set() => message = returned,
                Err(_) => return,
            }
        }
    }

    fn record_connect(&self) {
        let mut status = lock_status(&self.status);
        advance(&mut status, ConnectionState::Connected);
        status.connects += 1;
        status.last_connected_at = Some(Utc::now());
    }

    fn record_failed_attempt(&self) {
        let mut status = lock_status(&self.status);
        advance(&mut status, ConnectionState::Disconnected);
        status.failed_attempts += 1;
    }
}

fn lock_status(status: &Mutex<ConnectorStatus>) -> MutexGuard<'_, ConnectorStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_state(status: &Mutex<ConnectorStatus>, state: ConnectionState) {
    advance(&mut lock_status(status), state);
}

/// Closing and Closed are terminal: a late worker update never reopens them.
fn advance(status: &mut ConnectorStatus, state: ConnectionState) {
    let terminal = matches!(status.state, ConnectionState::Closing | ConnectionState::Closed);
    if !terminal || state == ConnectionState::Closed {
        status.state = state;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
