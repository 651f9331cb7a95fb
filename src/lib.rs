//! # netcode-server
//!
//! Authoritative server half of a netcode.io-style connection protocol for
//! UDP transports.
//!
//! Clients present a connect token minted by a trusted backend. The server
//! proves the client owns its address with a challenge/response handshake,
//! then promotes it into one of a fixed number of client slots and
//! exchanges encrypted keep-alive and payload packets with it.
//!
//! ## Layout
//! - [`core`]: binary cursor, token codec, packet codec
//! - [`protocol`]: handshake engine and replay guard
//! - [`session`]: pending mappings, token history, client slots
//! - [`transport`]: outbound datagram seam (memory, UDP)
//! - [`service`]: tokio event loop
//! - [`config`], [`error`], [`utils`]: configuration, errors, crypto,
//!   logging, metrics
//!
//! ## Example
//! ```rust
//! use netcode_server::config::NetworkConfig;
//! use netcode_server::protocol::server::Server;
//! use netcode_server::transport::memory::MemoryTransport;
//! use netcode_server::utils::crypto::Key;
//!
//! let config = NetworkConfig::default_with_overrides(|c| {
//!     c.server.private_key = Key::from_bytes([7; 32]);
//! });
//! let mut server = Server::new(&config, MemoryTransport::new())?;
//! server.init()?;
//! server.start()?;
//! server.update(0.0);
//! assert_eq!(server.connected_count(), 0);
//! # Ok::<(), netcode_server::error::ProtocolError>(())
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod session;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
