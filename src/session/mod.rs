//! # Session Table
//!
//! Bounded storage for everything the server remembers about clients.
//!
//! ## Components
//! - **Pending mappings**: packet keys per address during the handshake
//! - **Token history**: fingerprints of consumed connect tokens
//! - **Client slots**: the fixed arena of connected clients
//!
//! The table is owned by a single server and mutated only from its receive
//! and update paths; it performs no locking of its own.

pub mod history;
pub mod pending;
pub mod slots;

use std::net::SocketAddr;

use tracing::debug;

use crate::config::SessionConfig;
use crate::core::token::{ChallengeToken, PrivateConnectToken, TokenFingerprint};
use crate::session::history::TokenHistory;
use crate::session::pending::{PendingMapping, PendingMappings};
use crate::session::slots::{ClientSlot, ClientSlots};

#[derive(Debug)]
pub struct SessionTable {
    pub pending: PendingMappings,
    pub history: TokenHistory,
    pub slots: ClientSlots,
}

impl SessionTable {
    pub fn new(max_clients: usize, config: &SessionConfig) -> Self {
        Self {
            pending: PendingMappings::new(max_clients + config.pending_margin),
            history: TokenHistory::new(config.token_history_capacity),
            slots: ClientSlots::new(max_clients),
        }
    }

    pub fn find_slot_by_address(&self, addr: &SocketAddr) -> Option<usize> {
        self.slots.find_by_address(addr)
    }

    pub fn find_slot_by_client_id(&self, client_id: u64) -> Option<usize> {
        self.slots.find_by_client_id(client_id)
    }

    /// Record a connect token as consumed. False if it was already used or
    /// the history is full.
    pub fn find_or_create_pending(
        &mut self,
        fingerprint: TokenFingerprint,
        addr: SocketAddr,
        now: f64,
        expire_timestamp: u64,
        current_timestamp: u64,
    ) -> bool {
        self.history
            .find_or_insert(fingerprint, addr, now, expire_timestamp, current_timestamp)
    }

    /// Store the token's packet keys for `addr` until `expire_at`.
    pub fn add_pending_mapping(
        &mut self,
        token: &PrivateConnectToken,
        addr: SocketAddr,
        now: f64,
        expire_at: f64,
    ) -> bool {
        self.pending.add(
            addr,
            token.server_to_client_key.clone(),
            token.client_to_server_key.clone(),
            now,
            expire_at,
        )
    }

    pub fn find_pending_mapping(&self, addr: &SocketAddr, now: f64) -> Option<&PendingMapping> {
        self.pending.find(addr, now)
    }

    pub fn set_mapping_expiration(&mut self, addr: &SocketAddr, expire_at: Option<f64>) -> bool {
        self.pending.set_expiration(addr, expire_at)
    }

    pub fn connected_count(&self) -> usize {
        self.slots.connected_count()
    }

    /// Drop expired pending mappings and token fingerprints.
    pub fn evict_expired(&mut self, now: f64, current_timestamp: u64) {
        let mappings = self.pending.evict_expired(now);
        let tokens = self.history.evict_expired(current_timestamp);
        if mappings + tokens > 0 {
            debug!(mappings, tokens, "Session table eviction");
        }
    }

    /// Promote the handshake for `addr` into a slot.
    ///
    /// Takes the keys from the pending mapping, which then never expires.
    /// Returns `None` if there is no live mapping, no free slot, or the
    /// address or client id already owns a slot.
    pub fn occupy_slot(
        &mut self,
        challenge: &ChallengeToken,
        addr: SocketAddr,
        now: f64,
    ) -> Option<usize> {
        let mapping = self.pending.find(&addr, now)?;
        let slot = ClientSlot::new(
            challenge.client_id,
            addr,
            mapping.send_key.clone(),
            mapping.recv_key.clone(),
            challenge.user_data,
            now,
        );
        let index = self.slots.occupy(slot)?;
        self.set_mapping_expiration(&addr, None);
        Some(index)
    }

    /// Free slot `index` and forget the keys of its address.
    pub fn release_slot(&mut self, index: usize) -> Option<ClientSlot> {
        let slot = self.slots.release(index)?;
        self.pending.remove(&slot.address);
        Some(slot)
    }
}
