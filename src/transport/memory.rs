//! In-memory transport that records every datagram the server sends.

use std::net::SocketAddr;

use crate::error::{constants, ProtocolError, Result};
use crate::transport::Transport;

/// One recorded outbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub data: Vec<u8>,
    pub to: SocketAddr,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    bound: Option<SocketAddr>,
    sent: Vec<SentDatagram>,
    refuse_bind: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `listen` always fails.
    pub fn refusing_bind() -> Self {
        Self {
            refuse_bind: true,
            ..Self::default()
        }
    }

    /// Take every datagram recorded so far.
    pub fn drain(&mut self) -> Vec<SentDatagram> {
        std::mem::take(&mut self.sent)
    }

    pub fn sent(&self) -> &[SentDatagram] {
        &self.sent
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }
}

impl Transport for MemoryTransport {
    fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        if self.refuse_bind {
            return Err(ProtocolError::TransportError(format!("bind to {addr} refused")));
        }
        self.bound = Some(addr);
        Ok(addr)
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> Result<()> {
        if self.bound.is_none() {
            return Err(ProtocolError::TransportError(
                constants::ERR_TRANSPORT_NOT_BOUND.to_string(),
            ));
        }
        self.sent.push(SentDatagram {
            data: data.to_vec(),
            to: addr,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.bound = None;
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.bound
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_records_until_closed() {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let mut transport = MemoryTransport::new();
        assert!(transport.send_to(b"early", peer).is_err());

        transport.listen(addr).unwrap();
        transport.send_to(b"hello", peer).unwrap();
        assert_eq!(transport.drain(), vec![SentDatagram { data: b"hello".to_vec(), to: peer }]);
        assert!(transport.sent().is_empty());

        transport.close();
        assert!(!transport.is_bound());
        assert!(MemoryTransport::refusing_bind().listen(addr).is_err());
    }
}
