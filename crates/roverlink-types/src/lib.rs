//! `roverlink-types` – shared vocabulary of the relay.
//!
//! Everything that crosses a crate boundary lives here: the wire-level
//! [`Command`] and [`Packet`] shapes, the [`Telemetry`] object forwarded from
//! the vehicle, upstream [`Endpoint`] descriptions and the workspace-wide
//! [`RelayError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Commands
// ────────────────────────────────────────────────────────────────────────────

/// Actuation commands understood by the vehicle.
///
/// The integer codes are the single encoding table used on the wire:
///
/// | Code | Command |
/// |---|---|
/// | 1 | [`CommandId::Advance`] |
/// | 2 | [`CommandId::Retreat`] |
/// | 3 | [`CommandId::Brake`] |
/// | 4 | [`CommandId::TurnLeft`] |
/// | 5 | [`CommandId::TurnRight`] |
/// | 6 | [`CommandId::LookHorizontally`] |
/// | 7 | [`CommandId::LookVertically`] |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum CommandId {
    Advance = 1,
    Retreat = 2,
    Brake = 3,
    TurnLeft = 4,
    TurnRight = 5,
    /// Pan the camera mount; value is an angle in degrees (-90..=90).
    LookHorizontally = 6,
    /// Tilt the camera mount; value is an angle in degrees (-90..=90).
    LookVertically = 7,
}

impl CommandId {
    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<CommandId> for u8 {
    fn from(id: CommandId) -> Self {
        id.code()
    }
}

impl TryFrom<u8> for CommandId {
    type Error = RelayError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(CommandId::Advance),
            2 => Ok(CommandId::Retreat),
            3 => Ok(CommandId::Brake),
            4 => Ok(CommandId::TurnLeft),
            5 => Ok(CommandId::TurnRight),
            6 => Ok(CommandId::LookHorizontally),
            7 => Ok(CommandId::LookVertically),
            other => Err(RelayError::Serialization(format!(
                "unknown command code {other}"
            ))),
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandId::Advance => "advance",
            CommandId::Retreat => "retreat",
            CommandId::Brake => "brake",
            CommandId::TurnLeft => "turn_left",
            CommandId::TurnRight => "turn_right",
            CommandId::LookHorizontally => "look_horizontally",
            CommandId::LookVertically => "look_vertically",
        };
        f.write_str(name)
    }
}

/// A single actuation request sent to the control upstream.
///
/// Serialises as `{"command": <int>, "value": <int|null>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "command")]
    pub id: CommandId,
    /// Magnitude (speed percentage or angle); `None` for commands without one.
    pub value: Option<i32>,
}

impl Command {
    pub fn new(id: CommandId, value: Option<i32>) -> Self {
        Self { id, value }
    }

    /// Stop both drive motors.
    pub fn brake() -> Self {
        Self::new(CommandId::Brake, None)
    }

    /// Encode as the JSON text frame expected by the vehicle.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Serialization(e.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Telemetry
// ────────────────────────────────────────────────────────────────────────────

/// Vehicle telemetry snapshot, kept as the JSON object the producer sent.
///
/// Fields other than the ones with typed accessors are forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Telemetry(Map<String, Value>);

impl Telemetry {
    /// Parse a telemetry text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] when the text is not JSON or is
    /// not a JSON object.
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(RelayError::Serialization(format!(
                "telemetry must be a JSON object, got {other}"
            ))),
            Err(e) => Err(RelayError::Serialization(e.to_string())),
        }
    }

    /// Distance to the nearest obstacle ahead, in the producer's unit.
    pub fn distance_ahead(&self) -> Option<f64> {
        self.0.get("distance_ahead").and_then(Value::as_f64)
    }

    /// Wheel speed reported by the pulse counter.
    pub fn speed(&self) -> Option<f64> {
        self.0.get("speed").and_then(Value::as_f64)
    }

    /// WiFi signal strength in dBm.
    pub fn rssi(&self) -> Option<i64> {
        self.0.get("rssi").and_then(Value::as_i64)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Telemetry {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Downstream packets
// ────────────────────────────────────────────────────────────────────────────

/// A unit of data forwarded to the downstream consumer.
///
/// In envelope form it serialises as `{"type": "stream", "data": "<base64>"}`
/// or `{"type": "telemetry", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Packet {
    /// A processed camera frame.
    Stream(#[serde(with = "base64_bytes")] Vec<u8>),
    Telemetry(Telemetry),
}

impl Packet {
    /// Encode as a JSON envelope text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Serialization(e.to_string()))
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        // Producers using MIME-style encoders wrap lines every 76 chars.
        let compact: String = encoded.split_whitespace().collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Upstream endpoints
// ────────────────────────────────────────────────────────────────────────────

/// Which directions a connector uses on its upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    #[serde(alias = "r")]
    Read,
    #[serde(alias = "w")]
    Write,
    #[serde(alias = "rw")]
    ReadWrite,
}

impl ConnectionMode {
    pub fn reads(self) -> bool {
        matches!(self, ConnectionMode::Read | ConnectionMode::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, ConnectionMode::Write | ConnectionMode::ReadWrite)
    }
}

/// An upstream producer or command sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub uri: String,
    pub mode: ConnectionMode,
}

impl Endpoint {
    pub fn new(uri: impl Into<String>, mode: ConnectionMode) -> Self {
        Self {
            uri: uri.into(),
            mode,
        }
    }
}

/// Lifecycle of an upstream connection as seen by its connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What a single-slot mailbox does when an item arrives while one is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the pending item, discard the arrival. `put` never blocks.
    DropNewest,
    /// Suspend the producer until the pending item has been taken.
    BlockProducer,
    /// Replace the pending item with the arrival. `put` never blocks.
    KeepLatest,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Transport Error on {uri}: {details}")]
    Transport { uri: String, details: String },

    #[error("Frame Decode Error: {0}")]
    Decode(String),

    #[error("Frame Encode Error: {0}")]
    Encode(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Connector for {0} used before start()")]
    NotStarted(String),

    #[error("Connector for {0} has been stopped")]
    Stopped(String),

    #[error("Connector for {uri} is not configured to {operation}")]
    ModeMismatch { uri: String, operation: &'static str },

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("Downstream connection closed")]
    DownstreamClosed,

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_to_wire_table() {
        let json = Command::brake().to_json().unwrap();
        assert_eq!(json, r#"{"command":3,"value":null}"#);

        let json = Command::new(CommandId::LookVertically, Some(-45))
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"command":7,"value":-45}"#);
    }

    #[test]
    fn command_rejects_unknown_code() {
        let err = serde_json::from_str::<Command>(r#"{"command":9,"value":null}"#);
        assert!(err.is_err());
        assert!(CommandId::try_from(0).is_err());
    }

    #[test]
    fn command_codes_are_stable() {
        let ids = [
            CommandId::Advance,
            CommandId::Retreat,
            CommandId::Brake,
            CommandId::TurnLeft,
            CommandId::TurnRight,
            CommandId::LookHorizontally,
            CommandId::LookVertically,
        ];
        for (expected, id) in (1u8..).zip(ids) {
            assert_eq!(id.code(), expected);
            assert_eq!(CommandId::try_from(expected).unwrap(), id);
        }
    }

    #[test]
    fn telemetry_reads_typed_fields() {
        let t = Telemetry::from_json(
            r#"{"timestamp":"2024-05-01T10:00:00Z","rssi":-61,"speed":1.5,"distance_ahead":3}"#,
        )
        .unwrap();
        assert_eq!(t.distance_ahead(), Some(3.0));
        assert_eq!(t.rssi(), Some(-61));
        assert_eq!(t.speed(), Some(1.5));
        assert_eq!(
            t.get("timestamp").and_then(Value::as_str),
            Some("2024-05-01T10:00:00Z")
        );
    }

    #[test]
    fn telemetry_must_be_an_object() {
        assert!(Telemetry::from_json("[1,2,3]").is_err());
        assert!(Telemetry::from_json("not json").is_err());
        assert!(Telemetry::from_json("{}").unwrap().is_empty());
    }

    #[test]
    fn stream_packet_uses_base64_envelope() {
        let json = Packet::Stream(b"jpeg".to_vec()).to_json().unwrap();
        assert_eq!(json, r#"{"type":"stream","data":"anBlZw=="}"#);
    }

    #[test]
    fn telemetry_packet_embeds_object() {
        let t = Telemetry::from_json(r#"{"speed":2}"#).unwrap();
        let json = Packet::Telemetry(t).to_json().unwrap();
        assert_eq!(json, r#"{"type":"telemetry","data":{"speed":2}}"#);
    }

    #[test]
    fn stream_packet_accepts_wrapped_base64() {
        let packet: Packet =
            serde_json::from_str(r#"{"type":"stream","data":"anBl\nZw==\n"}"#).unwrap();
        assert_eq!(packet, Packet::Stream(b"jpeg".to_vec()));
    }

    #[test]
    fn connection_mode_accepts_short_aliases() {
        let mode: ConnectionMode = serde_json::from_str(r#""rw""#).unwrap();
        assert_eq!(mode, ConnectionMode::ReadWrite);
        assert!(mode.reads() && mode.writes());

        let mode: ConnectionMode = serde_json::from_str(r#""write""#).unwrap();
        assert!(!mode.reads());
        assert!(mode.writes());
    }

    #[test]
    fn relay_error_display() {
        let err = RelayError::Transport {
            uri: "ws://car/telemetry".to_string(),
            details: "refused".to_string(),
        };
        assert!(err.to_string().contains("ws://car/telemetry"));

        let err = RelayError::ModeMismatch {
            uri: "ws://car".to_string(),
            operation: "send",
        };
        assert!(err.to_string().contains("send"));
    }
}
