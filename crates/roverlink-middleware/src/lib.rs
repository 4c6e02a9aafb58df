//! `roverlink-middleware` – connection plumbing between the vehicle and the
//! relay.
//!
//! Moves bytes without caring what they mean.
//!
//! # Modules
//!
//! - [`slot`] – [`FreshnessSlot`]: capacity-1 mailbox with a fixed overflow
//!   policy, the only state shared between a network thread and the session
//!   thread.
//! - [`signal`] – [`StopSignal`]: monotonic, waitable cancellation flag.
//! - [`transport`] – the [`Transport`] / [`Connection`] seam.
//! - [`ws`] – blocking WebSocket transport on `tungstenite`.
//! - [`memory`] – in-process transport for simulation and tests.
//! - [`connector`] – [`UpstreamConnector`]: one upstream connection kept
//!   alive by a worker thread with fixed-backoff reconnects.

pub mod connector;
pub mod memory;
pub mod signal;
pub mod slot;
pub mod transport;
pub mod ws;

pub use connector::{ConnectorConfig, ConnectorStatus, UpstreamConnector};
pub use memory::MemoryTransport;
pub use signal::StopSignal;
pub use slot::FreshnessSlot;
pub use transport::{Connection, Transport, TransportError, WireMessage};
pub use ws::WsTransport;
