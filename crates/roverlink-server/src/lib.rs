//! `roverlink-server` – accepts downstream consumers over WebSocket.
//!
//! Each accepted connection is upgraded with `tungstenite` and served by its
//! own [`DownstreamSession`][roverlink_runtime::DownstreamSession] thread.
//! See [`RelayServer`] for the accept loop and shutdown behaviour.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roverlink_middleware::{StopSignal, WsTransport};
//! use roverlink_runtime::SessionConfig;
//! use roverlink_server::{DEFAULT_LISTEN_ADDR, RelayServer};
//!
//! let shutdown = StopSignal::new();
//! let server = RelayServer::bind(
//!     DEFAULT_LISTEN_ADDR,
//!     SessionConfig::default(),
//!     Arc::new(WsTransport),
//!     shutdown,
//! )
//! .expect("bind");
//! server.run().expect("relay server failed");
//! ```

pub mod server;

pub use server::{DEFAULT_LISTEN_ADDR, RelayServer};
