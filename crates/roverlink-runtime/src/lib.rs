//! `roverlink-runtime` – the relay session and everything it plugs in.
//!
//! # Modules
//!
//! - [`session`] – [`DownstreamSession`]: owns one consumer connection and
//!   the three upstream connectors feeding it; drains, decides, forwards.
//! - [`command`] – [`CommandSender`]: the session's only way to reach the
//!   control upstream, with optional suppression of repeated commands.
//! - [`frame`] – [`FrameProcessor`] and the [`GrayscaleProcessor`] applied
//!   to every camera frame.
//! - [`drive_policy`] – [`DrivePolicy`] and the reference
//!   [`ProximityBrake`].
//! - [`telemetry`] – [`init_tracing`]: console / JSON logging with an
//!   optional OTLP span exporter.

pub mod command;
pub mod drive_policy;
pub mod frame;
pub mod session;
pub mod telemetry;

pub use command::{CommandSender, Dispatch};
pub use drive_policy::{DrivePolicy, NoopPolicy, ProximityBrake};
pub use frame::{FrameProcessor, GrayscaleProcessor, PassthroughProcessor};
pub use session::{
    DownstreamSession, EndReason, FeedConfig, PacketFormat, SessionConfig, SessionSummary,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
