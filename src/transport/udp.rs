//! # UDP Transport
//!
//! Tokio UDP socket shared between the receive task and the engine.
//!
//! The engine sends with `try_send_to`, so a full socket buffer drops the
//! datagram instead of stalling the tick. The receive side is driven by the
//! event loop through [`UdpTransport::socket`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info, instrument};

use crate::error::{constants, ProtocolError, Result};
use crate::transport::Transport;

#[derive(Debug, Default)]
pub struct UdpTransport {
    socket: Option<Arc<UdpSocket>>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the bound socket, for the receive task.
    pub fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.clone()
    }
}

impl Transport for UdpTransport {
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self))]
    fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let std_socket = std::net::UdpSocket::bind(addr)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        let local = socket.local_addr()?;
        info!(address = %local, "UDP transport bound");
        self.socket = Some(Arc::new(socket));
        Ok(local)
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            ProtocolError::TransportError(constants::ERR_TRANSPORT_CLOSED.to_string())
        })?;
        let sent = socket.try_send_to(data, addr)?;
        if sent != data.len() {
            debug!(sent, expected = data.len(), %addr, "Short datagram write");
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("UDP transport closed");
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}
