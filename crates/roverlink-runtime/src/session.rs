//! [`DownstreamSession`] – relays one consumer connection.
//!
//! A session owns three upstream connectors (stream, telemetry, control) and
//! the [`CommandSender`] wrapping the control connector.  All of them are
//! started when [`DownstreamSession::run`] begins and stopped, with their
//! worker threads joined, on every way out of it.
//!
//! # Loop
//!
//! Each iteration:
//!
//! 1. **Drain** – take whatever the stream and telemetry connectors hold.
//!    Frames go through the [`FrameProcessor`]; telemetry text is parsed.
//!    Either one that fails is skipped with a warning.
//! 2. **Decide** – when something was drained, ask the [`DrivePolicy`] about
//!    the latest telemetry and frame and push any resulting command.
//! 3. **Forward** – send the packets downstream in the order they were
//!    produced.  A closed downstream ends the session.
//!
//! An iteration that drained nothing listens on the downstream for the poll
//! interval instead of spinning.  Consumer messages are discarded; a close
//! from the consumer ends the session even while every upstream is quiet.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roverlink_middleware::{StopSignal, WsTransport};
//! use roverlink_runtime::session::{DownstreamSession, SessionConfig};
//! # fn downstream() -> Box<dyn roverlink_middleware::Connection> { unimplemented!() }
//!
//! let mut consumer = downstream();
//! let session = DownstreamSession::new(
//!     &SessionConfig::default(),
//!     Arc::new(WsTransport),
//!     StopSignal::new(),
//! );
//! let summary = session.run(consumer.as_mut()).expect("session failed");
//! println!("forwarded {} packets", summary.packets_sent);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use roverlink_middleware::connector::{ConnectorConfig, DEFAULT_RECONNECT_BACKOFF, DEFAULT_RECV_TIMEOUT};
use roverlink_middleware::{
    Connection, StopSignal, Transport, TransportError, UpstreamConnector, WireMessage,
};
use roverlink_types::{ConnectionMode, Endpoint, OverflowPolicy, Packet, RelayError, Telemetry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::command::{CommandSender, Dispatch};
use crate::drive_policy::{DEFAULT_DISTANCE_THRESHOLD, DrivePolicy, NoopPolicy, ProximityBrake};
use crate::frame::{FrameProcessor, GrayscaleProcessor};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default time an idle iteration listens on the downstream.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How packets are framed on the downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketFormat {
    /// JSON text frames: `{"type": "stream" | "telemetry", "data": ...}`.
    #[default]
    Envelope,
    /// Binary frames holding only processed image bytes.  Telemetry is not
    /// forwarded.
    RawBinary,
}

/// One upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub uri: String,
    pub mode: ConnectionMode,
    /// Policy of the slot on the feed's data direction: inbound for feeds
    /// that read, outbound for write-only feeds.
    pub overflow: OverflowPolicy,
}

impl FeedConfig {
    pub fn new(uri: impl Into<String>, mode: ConnectionMode, overflow: OverflowPolicy) -> Self {
        Self {
            uri: uri.into(),
            mode,
            overflow,
        }
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.uri.clone(), self.mode)
    }

    fn connector_config(&self, reconnect_backoff: Duration, recv_timeout: Duration) -> ConnectorConfig {
        let defaults = ConnectorConfig {
            reconnect_backoff,
            recv_timeout,
            ..ConnectorConfig::default()
        };
        if self.mode.reads() {
            ConnectorConfig {
                inbound_policy: self.overflow,
                ..defaults
            }
        } else {
            ConnectorConfig {
                outbound_policy: self.overflow,
                ..defaults
            }
        }
    }
}

/// Everything a session needs besides its transport and shutdown signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub stream: FeedConfig,
    pub telemetry: FeedConfig,
    pub control: FeedConfig,
    pub reconnect_backoff: Duration,
    pub recv_timeout: Duration,
    pub poll_interval: Duration,
    pub packet_format: PacketFormat,
    /// Suppress a command identical to the last one queued.
    pub send_on_change_only: bool,
    /// Run the proximity brake; when off the session only observes.
    pub autopilot: bool,
    pub distance_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream: FeedConfig::new(
                "ws://localhost:8766/stream",
                ConnectionMode::Read,
                OverflowPolicy::DropNewest,
            ),
            telemetry: FeedConfig::new(
                "ws://localhost:80/telemetry",
                ConnectionMode::Read,
                OverflowPolicy::DropNewest,
            ),
            control: FeedConfig::new(
                "ws://localhost:80/",
                ConnectionMode::Write,
                OverflowPolicy::BlockProducer,
            ),
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            packet_format: PacketFormat::default(),
            send_on_change_only: false,
            autopilot: true,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary
// ─────────────────────────────────────────────────────────────────────────────

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The process-level shutdown signal was raised.
    Shutdown,
    /// The consumer went away.
    DownstreamClosed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Shutdown => f.write_str("shutdown"),
            EndReason::DownstreamClosed => f.write_str("downstream closed"),
        }
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub packets_sent: u64,
    pub commands_sent: u64,
    /// Frames the processor rejected.
    pub frames_dropped: u64,
    /// Telemetry messages that were not JSON objects.
    pub telemetry_dropped: u64,
    pub end_reason: EndReason,
}

#[derive(Debug, Default)]
struct Counters {
    packets_sent: u64,
    commands_sent: u64,
    frames_dropped: u64,
    telemetry_dropped: u64,
}

impl Counters {
    fn finish(self, end_reason: EndReason) -> SessionSummary {
        SessionSummary {
            packets_sent: self.packets_sent,
            commands_sent: self.commands_sent,
            frames_dropped: self.frames_dropped,
            telemetry_dropped: self.telemetry_dropped,
            end_reason,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DownstreamSession
// ─────────────────────────────────────────────────────────────────────────────

/// Relay state for one downstream consumer.
pub struct DownstreamSession {
    id: Uuid,
    stream: UpstreamConnector,
    telemetry: UpstreamConnector,
    commands: CommandSender,
    processor: Box<dyn FrameProcessor>,
    policy: Box<dyn DrivePolicy>,
    shutdown: StopSignal,
    poll_interval: Duration,
    packet_format: PacketFormat,
}

impl DownstreamSession {
    /// Build a session with the grayscale processor and, when autopilot is
    /// on, a [`ProximityBrake`] at the configured threshold.  No connection
    /// is opened until [`run`](Self::run).
    pub fn new(config: &SessionConfig, transport: Arc<dyn Transport>, shutdown: StopSignal) -> Self {
        let connector = |name: &str, feed: &FeedConfig| {
            UpstreamConnector::new(
                name,
                feed.endpoint(),
                Arc::clone(&transport),
                feed.connector_config(config.reconnect_backoff, config.recv_timeout),
            )
        };

        Self {
            id: Uuid::new_v4(),
            stream: connector("stream", &config.stream),
            telemetry: connector("telemetry", &config.telemetry),
            commands: CommandSender::new(
                connector("control", &config.control),
                config.send_on_change_only,
            ),
            processor: Box::new(GrayscaleProcessor),
            policy: if config.autopilot {
                Box::new(ProximityBrake::new(config.distance_threshold))
            } else {
                Box::new(NoopPolicy)
            },
            shutdown,
            poll_interval: config.poll_interval,
            packet_format: config.packet_format,
        }
    }

    pub fn with_frame_processor(mut self, processor: impl FrameProcessor + 'static) -> Self {
        self.processor = Box::new(processor);
        self
    }

    pub fn with_drive_policy(mut self, policy: impl DrivePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Relay until the downstream closes or shutdown is requested, then tear
    /// everything down.
    ///
    /// Every connector is stopped and joined before this returns, whatever
    /// the outcome.  `downstream` is closed on the way out.
    ///
    /// # Errors
    ///
    /// [`RelayError::Spawn`] if a connector worker could not be started, a
    /// [`RelayError::Transport`] when sending downstream fails other than by
    /// the peer closing, or a command encoding error.
    pub fn run(mut self, downstream: &mut dyn Connection) -> Result<SessionSummary, RelayError> {
        let span = info_span!("session", id = %self.id);
        let _entered = span.enter();
        info!("session started");

        let result = self.start_connectors().and_then(|()| self.relay(downstream));

        self.stop_connectors();
        downstream.close();

        match &result {
            Ok(summary) => info!(
                reason = %summary.end_reason,
                packets_sent = summary.packets_sent,
                commands_sent = summary.commands_sent,
                frames_dropped = summary.frames_dropped,
                "session ended"
            ),
            Err(e) => warn!(error = %e, "session failed"),
        }
        result
    }

    fn start_connectors(&mut self) -> Result<(), RelayError> {
        self.stream.start()?;
        self.telemetry.start()?;
        self.commands.start()
    }

    fn stop_connectors(&mut self) {
        self.stream.stop();
        self.telemetry.stop();
        self.commands.stop();
    }

    fn relay(&mut self, downstream: &mut dyn Connection) -> Result<SessionSummary, RelayError> {
        let mut counters = Counters::default();
        let mut latest_telemetry = Telemetry::default();
        let mut latest_frame: Option<Vec<u8>> = None;

        loop {
            if self.shutdown.is_set() {
                return Ok(counters.finish(EndReason::Shutdown));
            }

            let mut packets = Vec::with_capacity(2);

            if let Some(raw) = self.stream.try_recv() {
                match self.processor.process_frame(&raw.into_bytes()) {
                    Ok(frame) => {
                        latest_frame = Some(frame.clone());
                        packets.push(Packet::Stream(frame));
                    }
                    Err(e) => {
                        warn!(error = %e, "skipping frame");
                        counters.frames_dropped += 1;
                    }
                }
            }

            if let Some(raw) = self.telemetry.try_recv() {
                match Telemetry::from_json(&raw.into_text()) {
                    Ok(telemetry) => {
                        latest_telemetry = telemetry.clone();
                        packets.push(Packet::Telemetry(telemetry));
                    }
                    Err(e) => {
                        warn!(error = %e, "skipping telemetry");
                        counters.telemetry_dropped += 1;
                    }
                }
            }

            if packets.is_empty() {
                match downstream.recv(self.poll_interval) {
                    Ok(_) => debug!("ignoring consumer message"),
                    Err(TransportError::Timeout) => {}
                    Err(e) if e.is_closed() => {
                        info!(error = %e, "downstream closed");
                        return Ok(counters.finish(EndReason::DownstreamClosed));
                    }
                    Err(e) => return Err(e.into_relay_error("downstream")),
                }
                continue;
            }

            if let Some(command) = self.policy.decide(&latest_telemetry, latest_frame.as_deref()) {
                if self.commands.send(command, &self.shutdown)? == Dispatch::Queued {
                    counters.commands_sent += 1;
                }
            }

            for packet in packets {
                let Some(message) = self.encode(packet)? else {
                    continue;
                };
                match downstream.send(message) {
                    Ok(()) => counters.packets_sent += 1,
                    Err(e) if e.is_closed() => {
                        info!(error = %e, "downstream closed");
                        return Ok(counters.finish(EndReason::DownstreamClosed));
                    }
                    Err(e) => return Err(e.into_relay_error("downstream")),
                }
            }
        }
    }

    fn encode(&self, packet: Packet) -> Result<Option<WireMessage>, RelayError> {
        match (self.packet_format, packet) {
            (PacketFormat::Envelope, packet) => packet.to_json().map(|text| Some(WireMessage::Text(text))),
            (PacketFormat::RawBinary, Packet::Stream(frame)) => Ok(Some(WireMessage::Binary(frame))),
            (PacketFormat::RawBinary, Packet::Telemetry(_)) => Ok(None),
        }
    }
}

impl fmt::Debug for DownstreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownstreamSession")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("telemetry", &self.telemetry)
            .field("control", self.commands.control())
            .field("packet_format", &self.packet_format)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PassthroughProcessor;
    use roverlink_middleware::memory::{self, MemoryConnection, MemoryListener, MemoryTransport};
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    const STREAM: &str = "mem://car/stream";
    const TELEMETRY: &str = "mem://car/telemetry";
    const CONTROL: &str = "mem://car/control";

    const WAIT: Duration = Duration::from_secs(2);

    struct Car {
        transport: Arc<MemoryTransport>,
        stream: MemoryListener,
        telemetry: MemoryListener,
        control: MemoryListener,
    }

    impl Car {
        fn new() -> Self {
            let transport = Arc::new(MemoryTransport::new());
            Self {
                stream: transport.bind(STREAM),
                telemetry: transport.bind(TELEMETRY),
                control: transport.bind(CONTROL),
                transport,
            }
        }

        fn transport(&self) -> Arc<dyn Transport> {
            Arc::clone(&self.transport) as Arc<dyn Transport>
        }
    }

    struct Peers {
        stream: MemoryConnection,
        telemetry: MemoryConnection,
        control: MemoryConnection,
    }

    fn accept_all(car: &Car) -> Peers {
        Peers {
            stream: car.stream.accept_timeout(WAIT).expect("stream connector"),
            telemetry: car.telemetry.accept_timeout(WAIT).expect("telemetry connector"),
            control: car.control.accept_timeout(WAIT).expect("control connector"),
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            stream: FeedConfig::new(STREAM, ConnectionMode::Read, OverflowPolicy::DropNewest),
            telemetry: FeedConfig::new(TELEMETRY, ConnectionMode::Read, OverflowPolicy::DropNewest),
            control: FeedConfig::new(CONTROL, ConnectionMode::Write, OverflowPolicy::BlockProducer),
            reconnect_backoff: Duration::from_millis(20),
            recv_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(2),
            ..SessionConfig::default()
        }
    }

    fn spawn(
        session: DownstreamSession,
        mut downstream: MemoryConnection,
    ) -> JoinHandle<Result<SessionSummary, RelayError>> {
        thread::spawn(move || session.run(&mut downstream))
    }

    fn text(message: WireMessage) -> serde_json::Value {
        serde_json::from_str(&message.into_text()).unwrap()
    }

    fn assert_closed(peer: &mut MemoryConnection) {
        let err = peer.recv(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TransportError::ClosedOk), "got {err:?}");
    }

    #[test]
    fn close_obstacle_brakes_and_forwards_telemetry() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), car.transport(), shutdown.clone());
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        peers
            .telemetry
            .send(WireMessage::Text(r#"{"distance_ahead":3,"speed":1.0}"#.into()))
            .unwrap();

        let packet = text(consumer.recv(WAIT).unwrap());
        assert_eq!(packet["type"], "telemetry");
        assert_eq!(packet["data"]["distance_ahead"], 3);
        assert_eq!(
            peers.control.recv(WAIT).unwrap(),
            WireMessage::Text(r#"{"command":3,"value":null}"#.into())
        );

        shutdown.set();
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.end_reason, EndReason::Shutdown);
        assert_eq!(summary.packets_sent, 1);
        assert_eq!(summary.commands_sent, 1);
    }

    #[test]
    fn autopilot_off_only_observes() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session_config = SessionConfig {
            autopilot: false,
            ..config()
        };
        let session = DownstreamSession::new(&session_config, car.transport(), shutdown.clone());
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        peers
            .telemetry
            .send(WireMessage::Text(r#"{"distance_ahead":0}"#.into()))
            .unwrap();
        consumer.recv(WAIT).unwrap();

        assert!(matches!(
            peers.control.recv(Duration::from_millis(100)),
            Err(TransportError::Timeout)
        ));
        shutdown.set();
        assert_eq!(handle.join().unwrap().unwrap().commands_sent, 0);
    }

    #[test]
    fn clear_path_sends_no_command() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), car.transport(), shutdown.clone());
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        peers
            .telemetry
            .send(WireMessage::Text(r#"{"distance_ahead":10}"#.into()))
            .unwrap();
        consumer.recv(WAIT).unwrap();

        assert!(matches!(
            peers.control.recv(Duration::from_millis(100)),
            Err(TransportError::Timeout)
        ));
        shutdown.set();
        assert_eq!(handle.join().unwrap().unwrap().commands_sent, 0);
    }

    #[test]
    fn frames_are_forwarded_as_base64_envelopes() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), car.transport(), shutdown.clone())
            .with_frame_processor(PassthroughProcessor);
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        peers.stream.send(WireMessage::Binary(b"jpeg".to_vec())).unwrap();

        let packet = text(consumer.recv(WAIT).unwrap());
        assert_eq!(packet["type"], "stream");
        assert_eq!(packet["data"], "anBlZw==");

        shutdown.set();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn unreadable_frames_are_skipped() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), car.transport(), shutdown.clone())
            .with_drive_policy(NoopPolicy);
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        peers.stream.send(WireMessage::Binary(b"not an image".to_vec())).unwrap();
        peers.telemetry.send(WireMessage::Text("[1,2]".into())).unwrap();
        thread::sleep(Duration::from_millis(50));
        peers.telemetry.send(WireMessage::Text(r#"{"rssi":-70}"#.into())).unwrap();

        // Only the valid telemetry makes it through.
        let packet = text(consumer.recv(WAIT).unwrap());
        assert_eq!(packet["type"], "telemetry");
        assert_eq!(packet["data"]["rssi"], -70);

        shutdown.set();
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.frames_dropped, 1);
        assert_eq!(summary.telemetry_dropped, 1);
        assert_eq!(summary.packets_sent, 1);
    }

    #[test]
    fn raw_binary_format_forwards_only_frames() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session_config = SessionConfig {
            packet_format: PacketFormat::RawBinary,
            ..config()
        };
        let session = DownstreamSession::new(&session_config, car.transport(), shutdown.clone())
            .with_frame_processor(PassthroughProcessor)
            .with_drive_policy(NoopPolicy);
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        peers.telemetry.send(WireMessage::Text(r#"{"speed":2}"#.into())).unwrap();
        thread::sleep(Duration::from_millis(50));
        peers.stream.send(WireMessage::Binary(vec![0xff, 0xd8, 0xff])).unwrap();

        assert_eq!(consumer.recv(WAIT).unwrap(), WireMessage::Binary(vec![0xff, 0xd8, 0xff]));
        assert!(matches!(
            consumer.recv(Duration::from_millis(50)),
            Err(TransportError::Timeout)
        ));

        shutdown.set();
        assert_eq!(handle.join().unwrap().unwrap().packets_sent, 1);
    }

    #[test]
    fn repeated_brake_is_sent_once_when_only_on_change() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session_config = SessionConfig {
            send_on_change_only: true,
            ..config()
        };
        let session = DownstreamSession::new(&session_config, car.transport(), shutdown.clone());
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        for distance in [3, 2] {
            peers
                .telemetry
                .send(WireMessage::Text(format!(r#"{{"distance_ahead":{distance}}}"#)))
                .unwrap();
            consumer.recv(WAIT).unwrap();
        }

        assert!(peers.control.recv(WAIT).is_ok());
        assert!(matches!(
            peers.control.recv(Duration::from_millis(100)),
            Err(TransportError::Timeout)
        ));

        shutdown.set();
        assert_eq!(handle.join().unwrap().unwrap().commands_sent, 1);
    }

    #[test]
    fn downstream_close_tears_down_every_connector() {
        let car = Car::new();
        let (session_end, consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), car.transport(), StopSignal::new())
            .with_drive_policy(NoopPolicy);
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        drop(consumer);

        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.end_reason, EndReason::DownstreamClosed);
        assert_eq!(summary.packets_sent, 0);

        // Workers dropped their connections before `run` returned.
        assert_closed(&mut peers.stream);
        assert_closed(&mut peers.telemetry);
        assert_closed(&mut peers.control);
    }

    #[test]
    fn consumer_leaving_while_upstreams_are_down_ends_session() {
        let transport = Arc::new(MemoryTransport::new());
        let (session_end, mut consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), transport.clone(), StopSignal::new());
        let handle = spawn(session, session_end);

        thread::sleep(Duration::from_millis(60));
        assert!(transport.connect_attempts() >= 3);

        let started = Instant::now();
        consumer.close();
        drop(consumer);
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.end_reason, EndReason::DownstreamClosed);
        assert_eq!(summary.packets_sent, 0);
        assert!(started.elapsed() < Duration::from_secs(1));

        // Every worker was joined, so nobody dials the car any more.
        let attempts = transport.connect_attempts();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(transport.connect_attempts(), attempts);
    }

    #[test]
    fn consumer_messages_are_ignored() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), car.transport(), shutdown.clone());
        let handle = spawn(session, session_end);
        let mut peers = accept_all(&car);

        consumer.send(WireMessage::Text("hello relay".into())).unwrap();
        peers.telemetry.send(WireMessage::Text(r#"{"speed":1}"#.into())).unwrap();
        assert_eq!(text(consumer.recv(WAIT).unwrap())["type"], "telemetry");

        shutdown.set();
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.end_reason, EndReason::Shutdown);
        assert_eq!(summary.packets_sent, 1);
    }

    #[test]
    fn shutdown_ends_session_with_unreachable_upstreams() {
        let transport = Arc::new(MemoryTransport::new());
        let shutdown = StopSignal::new();
        let (session_end, _consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), transport.clone(), shutdown.clone());
        let handle = spawn(session, session_end);

        thread::sleep(Duration::from_millis(60));
        assert!(transport.connect_attempts() >= 3);

        let started = Instant::now();
        shutdown.set();
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.end_reason, EndReason::Shutdown);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn consumer_sees_close_when_session_ends() {
        let car = Car::new();
        let shutdown = StopSignal::new();
        let (session_end, mut consumer) = memory::pair();
        let session = DownstreamSession::new(&config(), car.transport(), shutdown.clone());
        let handle = spawn(session, session_end);
        let _peers = accept_all(&car);

        shutdown.set();
        handle.join().unwrap().unwrap();
        assert_closed(&mut consumer);
    }

    #[test]
    fn feed_overflow_applies_to_its_data_direction() {
        let backoff = Duration::from_millis(10);
        let timeout = Duration::from_millis(20);

        let read = FeedConfig::new("mem://a", ConnectionMode::Read, OverflowPolicy::KeepLatest)
            .connector_config(backoff, timeout);
        assert_eq!(read.inbound_policy, OverflowPolicy::KeepLatest);
        assert_eq!(read.outbound_policy, OverflowPolicy::BlockProducer);

        let write = FeedConfig::new("mem://b", ConnectionMode::Write, OverflowPolicy::KeepLatest)
            .connector_config(backoff, timeout);
        assert_eq!(write.outbound_policy, OverflowPolicy::KeepLatest);
        assert_eq!(write.reconnect_backoff, backoff);
        assert_eq!(write.recv_timeout, timeout);
    }
}
