//! Pending mappings: per-address packet keys for handshakes in flight.
//!
//! A mapping is created when a connection request is accepted and is the
//! only way the server can read the follow-up response. Capacity is fixed
//! at construction; a full table first evicts expired mappings and then
//! refuses new addresses.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::debug;

use crate::utils::crypto::Key;

/// Keys and lifetime for one address.
#[derive(Debug, Clone)]
pub struct PendingMapping {
    /// Server -> client key.
    pub send_key: Key,
    /// Client -> server key.
    pub recv_key: Key,
    pub created_at: f64,
    /// `None` once the client owns a slot.
    pub expires_at: Option<f64>,
}

impl PendingMapping {
    pub fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|t| t < now)
    }
}

#[derive(Debug)]
pub struct PendingMappings {
    entries: HashMap<SocketAddr, PendingMapping>,
    capacity: usize,
}

impl PendingMappings {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert or refresh the mapping for `addr`.
    ///
    /// Returns false if the table is full of live mappings.
    pub fn add(
        &mut self,
        addr: SocketAddr,
        send_key: Key,
        recv_key: Key,
        now: f64,
        expires_at: f64,
    ) -> bool {
        let mapping = PendingMapping {
            send_key,
            recv_key,
            created_at: now,
            expires_at: Some(expires_at),
        };

        if let Some(existing) = self.entries.get_mut(&addr) {
            *existing = mapping;
            return true;
        }

        if self.entries.len() >= self.capacity && self.evict_expired(now) == 0 {
            return false;
        }

        self.entries.insert(addr, mapping);
        true
    }

    /// Live mapping for `addr`.
    pub fn find(&self, addr: &SocketAddr, now: f64) -> Option<&PendingMapping> {
        self.entries.get(addr).filter(|m| !m.is_expired(now))
    }

    /// Change the expiration of an existing mapping. `None` means never.
    pub fn set_expiration(&mut self, addr: &SocketAddr, expires_at: Option<f64>) -> bool {
        match self.entries.get_mut(addr) {
            Some(mapping) => {
                mapping.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<PendingMapping> {
        self.entries.remove(addr)
    }

    /// Drop every expired mapping, returning how many were removed.
    pub fn evict_expired(&mut self, now: f64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, mapping| !mapping.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Evicted expired pending mappings");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn key(b: u8) -> Key {
        Key::from_bytes([b; 32])
    }

    #[test]
    fn test_capacity_and_eviction() {
        let mut table = PendingMappings::new(2);
        assert!(table.add(addr(1), key(1), key(2), 0.0, 5.0));
        assert!(table.add(addr(2), key(1), key(2), 0.0, 10.0));
        assert!(!table.add(addr(3), key(1), key(2), 1.0, 6.0));

        // first mapping has expired by t=6
        assert!(table.add(addr(3), key(1), key(2), 6.0, 11.0));
        assert!(table.find(&addr(1), 6.0).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_same_address_refreshes() {
        let mut table = PendingMappings::new(1);
        assert!(table.add(addr(1), key(1), key(2), 0.0, 5.0));
        assert!(table.add(addr(1), key(3), key(4), 1.0, 6.0));
        let mapping = table.find(&addr(1), 5.5).unwrap();
        assert_eq!(mapping.send_key, key(3));
    }

    #[test]
    fn test_never_expiring_mapping_survives_eviction() {
        let mut table = PendingMappings::new(4);
        table.add(addr(1), key(1), key(2), 0.0, 1.0);
        assert!(table.set_expiration(&addr(1), None));
        assert_eq!(table.evict_expired(1_000.0), 0);
        assert!(table.find(&addr(1), 1_000.0).is_some());
        assert!(!table.set_expiration(&addr(9), None));
    }
}
