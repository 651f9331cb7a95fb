//! Connected-client slots.
//!
//! A fixed arena of `max_clients` optional records plus a free-index pool.
//! Indices are stable for the lifetime of a session and are handed out
//! lowest first. Address and client id lookups are hashed and cover only
//! occupied slots.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::net::SocketAddr;

use crate::core::token::USER_DATA_BYTES;
use crate::protocol::replay_guard::ReplayGuard;
use crate::utils::crypto::Key;

/// Session state of one connected client.
#[derive(Debug)]
pub struct ClientSlot {
    pub client_id: u64,
    pub address: SocketAddr,
    /// Server -> client key.
    pub send_key: Key,
    /// Client -> server key.
    pub recv_key: Key,
    /// Next outbound sequence for this client.
    pub sequence: u64,
    pub connect_time: f64,
    pub last_send_time: f64,
    pub last_recv_time: f64,
    /// Set on the first keep-alive or payload from the client.
    pub confirmed: bool,
    pub replay_guard: ReplayGuard,
    pub inbound: VecDeque<Vec<u8>>,
    pub user_data: [u8; USER_DATA_BYTES],
}

impl ClientSlot {
    pub fn new(
        client_id: u64,
        address: SocketAddr,
        send_key: Key,
        recv_key: Key,
        user_data: [u8; USER_DATA_BYTES],
        now: f64,
    ) -> Self {
        Self {
            client_id,
            address,
            send_key,
            recv_key,
            sequence: 0,
            connect_time: now,
            last_send_time: now,
            last_recv_time: now,
            confirmed: false,
            replay_guard: ReplayGuard::new(),
            inbound: VecDeque::new(),
            user_data,
        }
    }

    /// Take the next outbound sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        sequence
    }
}

#[derive(Debug)]
pub struct ClientSlots {
    slots: Vec<Option<ClientSlot>>,
    free: BinaryHeap<Reverse<usize>>,
    by_address: HashMap<SocketAddr, usize>,
    by_client_id: HashMap<u64, usize>,
}

impl ClientSlots {
    pub fn new(max_clients: usize) -> Self {
        let mut slots = Vec::with_capacity(max_clients);
        slots.resize_with(max_clients, || None);
        Self {
            slots,
            free: (0..max_clients).map(Reverse).collect(),
            by_address: HashMap::with_capacity(max_clients),
            by_client_id: HashMap::with_capacity(max_clients),
        }
    }

    /// Place `slot` at the lowest free index.
    ///
    /// Returns `None` (and drops `slot`) if every slot is taken or if its
    /// address or client id already owns a slot.
    pub fn occupy(&mut self, slot: ClientSlot) -> Option<usize> {
        if self.by_address.contains_key(&slot.address)
            || self.by_client_id.contains_key(&slot.client_id)
        {
            return None;
        }
        let Reverse(index) = self.free.pop()?;
        self.by_address.insert(slot.address, index);
        self.by_client_id.insert(slot.client_id, index);
        self.slots[index] = Some(slot);
        Some(index)
    }

    /// Free `index`, returning its session state.
    pub fn release(&mut self, index: usize) -> Option<ClientSlot> {
        let slot = self.slots.get_mut(index)?.take()?;
        self.by_address.remove(&slot.address);
        self.by_client_id.remove(&slot.client_id);
        self.free.push(Reverse(index));
        Some(slot)
    }

    pub fn get(&self, index: usize) -> Option<&ClientSlot> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ClientSlot> {
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn find_by_address(&self, addr: &SocketAddr) -> Option<usize> {
        self.by_address.get(addr).copied()
    }

    pub fn find_by_client_id(&self, client_id: u64) -> Option<usize> {
        self.by_client_id.get(&client_id).copied()
    }

    pub fn connected_count(&self) -> usize {
        self.by_client_id.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Indices of occupied slots in ascending order.
    pub fn occupied_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ClientSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|slot| (i, slot)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn slot(client_id: u64, port: u16) -> ClientSlot {
        ClientSlot::new(
            client_id,
            SocketAddr::from(([127, 0, 0, 1], port)),
            Key::from_bytes([1; 32]),
            Key::from_bytes([2; 32]),
            [0; USER_DATA_BYTES],
            0.0,
        )
    }

    #[test]
    fn test_lowest_free_index_reused() {
        let mut slots = ClientSlots::new(3);
        assert_eq!(slots.occupy(slot(1, 1)), Some(0));
        assert_eq!(slots.occupy(slot(2, 2)), Some(1));
        assert_eq!(slots.occupy(slot(3, 3)), Some(2));
        assert!(slots.is_full());
        assert_eq!(slots.occupy(slot(4, 4)), None);

        let released = slots.release(1).unwrap();
        assert_eq!(released.client_id, 2);
        assert_eq!(slots.find_by_client_id(2), None);
        assert_eq!(slots.occupy(slot(4, 4)), Some(1));
        assert_eq!(slots.occupied_indices(), vec![0, 1, 2]);
    }

    #[test]
    fn test_identity_uniqueness() {
        let mut slots = ClientSlots::new(4);
        slots.occupy(slot(1, 1)).unwrap();
        assert_eq!(slots.occupy(slot(1, 2)), None);
        assert_eq!(slots.occupy(slot(2, 1)), None);
        assert_eq!(slots.connected_count(), 1);
        assert_eq!(slots.find_by_address(&SocketAddr::from(([127, 0, 0, 1], 1))), Some(0));
    }

    #[test]
    fn test_release_twice_is_noop() {
        let mut slots = ClientSlots::new(1);
        slots.occupy(slot(1, 1)).unwrap();
        assert!(slots.release(0).is_some());
        assert!(slots.release(0).is_none());
        assert!(slots.release(7).is_none());
        assert_eq!(slots.connected_count(), 0);
    }

    #[test]
    fn test_sequence_counter() {
        let mut s = slot(1, 1);
        assert_eq!(s.next_sequence(), 0);
        assert_eq!(s.next_sequence(), 1);
        assert_eq!(s.sequence, 2);
    }
}
