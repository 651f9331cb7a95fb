//! # Transport Layer
//!
//! The outbound half of the datagram seam. The server never reads from a
//! socket itself: inbound datagrams are handed to
//! [`Server::process_packet`](crate::protocol::server::Server::process_packet)
//! by whoever owns the receive side, while replies go out through a
//! [`Transport`].
//!
//! ## Implementations
//! - **memory**: records outbound datagrams; used by tests and benches
//! - **udp**: non-blocking tokio UDP socket

pub mod memory;
pub mod udp;

use std::net::SocketAddr;

use crate::error::Result;

/// Datagram sink owned by a server.
pub trait Transport {
    /// Bind to `addr` and return the address actually bound.
    fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr>;

    /// Send one datagram. Must not block.
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> Result<()>;

    /// Release the underlying socket. Idempotent.
    fn close(&mut self);

    fn local_addr(&self) -> Option<SocketAddr>;
}
