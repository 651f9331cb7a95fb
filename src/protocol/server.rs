//! # Connection Server
//!
//! The authoritative handshake engine and session owner.
//!
//! ## Client states
//! ```text
//! Unknown --request--> Pending --response--> Connected --disconnect/timeout--> Released
//! ```
//!
//! ## Driving the engine
//! - [`Server::process_packet`] is the single entry point for inbound
//!   datagrams. Nothing that happens while reading a datagram is reported to
//!   the caller; bad input is logged, counted and dropped.
//! - [`Server::update`] must be called regularly. It is the only place the
//!   clock is read, and it drives keep-alives, timeouts and eviction.
//!
//! Both paths take `&mut self`; the engine is single-owner and never locks.
//!
//! ## Sequence spaces
//! Packets sent before a client owns a slot (challenges, denials) use the
//! server-global sequence, which starts at `1 << 63`. Per-slot sequences
//! start at zero, so the two never overlap.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tracing::{debug, info, instrument, trace, warn};

use crate::config::{NetworkConfig, MAX_PACKET_BYTES, NUM_DISCONNECT_PACKETS};
use crate::core::packet::{decode, encode, AllowedPackets, DecodeContext, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::session::slots::ClientSlot;
use crate::session::SessionTable;
use crate::transport::Transport;
use crate::utils::crypto::Key;
use crate::utils::metrics::Metrics;
use crate::utils::time::unix_timestamp;

/// First value of the server-global sequence.
pub const GLOBAL_SEQUENCE_START: u64 = 1 << 63;

/// Unpolled events kept per client slot; older events are dropped past this.
pub const EVENTS_PER_SLOT: usize = 4;

/// Why a client left its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a disconnect packet.
    ClientRequested,
    /// Nothing was received from the client within the client timeout.
    TimedOut,
    /// The application called `disconnect_client` or `disconnect_all`.
    ServerRequested,
    /// The server was stopped.
    ServerStopped,
}

/// Session changes reported to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected {
        client_index: usize,
        client_id: u64,
        address: SocketAddr,
    },
    ClientDisconnected {
        client_index: usize,
        client_id: u64,
        address: SocketAddr,
        reason: DisconnectReason,
    },
}

/// Session timing in seconds of tick time.
#[derive(Debug, Clone, Copy)]
pub(super) struct Timeouts {
    pub(super) connect: f64,
    pub(super) client: f64,
    pub(super) keep_alive: f64,
}

pub struct Server<T: Transport> {
    pub(super) transport: T,
    pub(super) bind_address: SocketAddr,
    pub(super) public_address: SocketAddr,
    pub(super) protocol_id: u64,
    pub(super) private_key: Key,
    pub(super) challenge_key: Option<Key>,
    pub(super) max_clients: usize,
    pub(super) allowed_packets: AllowedPackets,
    pub(super) ignore_requests: bool,
    pub(super) ignore_responses: bool,
    pub(super) timeouts: Timeouts,
    pub(super) payload_queue_limit: usize,
    pub(super) sessions: SessionTable,
    pub(super) global_sequence: u64,
    pub(super) challenge_sequence: u64,
    /// Tick time of the last `update`, in seconds.
    pub(super) time: f64,
    /// Unix time of the last `update`, for token expiry.
    pub(super) timestamp: u64,
    pub(super) running: bool,
    pub(super) events: VecDeque<ServerEvent>,
    pub(super) event_limit: usize,
    pub(super) metrics: Metrics,
}

impl<T: Transport> Server<T> {
    /// Build a stopped server from configuration.
    ///
    /// # Errors
    /// `ProtocolError::ConfigError` if an address does not parse.
    pub fn new(config: &NetworkConfig, transport: T) -> Result<Self> {
        let server = &config.server;
        let session = &config.session;
        Ok(Self {
            transport,
            bind_address: server.bind_addr()?,
            public_address: server.public_addr()?,
            protocol_id: server.protocol_id,
            private_key: server.private_key.clone(),
            challenge_key: None,
            max_clients: server.max_clients,
            allowed_packets: server.allowed_packets,
            ignore_requests: server.ignore_requests,
            ignore_responses: server.ignore_responses,
            timeouts: Timeouts {
                connect: session.connect_timeout.as_secs_f64(),
                client: session.client_timeout.as_secs_f64(),
                keep_alive: session.keep_alive_interval.as_secs_f64(),
            },
            payload_queue_limit: session.payload_queue_limit,
            sessions: SessionTable::new(server.max_clients, session),
            global_sequence: GLOBAL_SEQUENCE_START,
            challenge_sequence: 0,
            time: 0.0,
            timestamp: 0,
            running: false,
            events: VecDeque::new(),
            event_limit: server.max_clients.max(1) * EVENTS_PER_SLOT,
            metrics: Metrics::new(),
        })
    }

    /// Generate the challenge key.
    ///
    /// # Errors
    /// `ProtocolError::KeyGeneration` if the system RNG fails.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<()> {
        self.challenge_key = Some(Key::generate()?);
        debug!("Challenge key generated");
        Ok(())
    }

    /// Bind the transport and begin accepting packets.
    ///
    /// # Errors
    /// `NotInitialized` before `init`, or the transport's bind error.
    #[instrument(skip(self), fields(address = %self.bind_address))]
    pub fn start(&mut self) -> Result<()> {
        if self.challenge_key.is_none() {
            return Err(ProtocolError::NotInitialized);
        }
        if self.running {
            return Err(ProtocolError::Custom(constants::ERR_ALREADY_RUNNING.to_string()));
        }
        self.timestamp = unix_timestamp()?;
        let local = self.transport.listen(self.bind_address)?;
        // an ephemeral bind port is only known once bound
        if self.public_address == self.bind_address {
            self.public_address = local;
        }
        self.running = true;
        info!(
            address = %local,
            public_address = %self.public_address,
            max_clients = self.max_clients,
            protocol_id = format_args!("{:#x}", self.protocol_id),
            "Server started"
        );
        Ok(())
    }

    /// Disconnect every client, close the transport and stop accepting.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.disconnect_all_with(DisconnectReason::ServerStopped);
        self.transport.close();
        self.running = false;
        info!("Server stopped");
    }

    /// Handle one inbound datagram.
    pub fn process_packet(&mut self, data: &[u8], from: SocketAddr) {
        if !self.running {
            return;
        }
        self.metrics.packet_received(data.len() as u64);
        if data.is_empty() {
            return;
        }

        let slot_index = self.sessions.find_slot_by_address(&from);
        let protocol_id = self.protocol_id;
        let current_timestamp = self.timestamp;
        let allowed = self.allowed_packets;
        let now = self.time;

        let decoded = {
            let ctx = match slot_index.and_then(|i| self.sessions.slots.get_mut(i)) {
                Some(slot) => DecodeContext {
                    protocol_id,
                    current_timestamp,
                    allowed,
                    read_key: Some(&slot.recv_key),
                    replay_guard: Some(&mut slot.replay_guard),
                },
                None => DecodeContext {
                    protocol_id,
                    current_timestamp,
                    allowed,
                    read_key: self.sessions.pending.find(&from, now).map(|m| &m.recv_key),
                    replay_guard: None,
                },
            };
            decode(data, ctx)
        };

        let packet = match decoded {
            Ok(packet) => packet,
            Err(e) => {
                match e {
                    ProtocolError::ReplayDetected(_) => self.metrics.replay_dropped(),
                    ProtocolError::DisallowedPacket(_) => self.metrics.policy_dropped(),
                    _ => self.metrics.malformed_dropped(),
                }
                debug!(%from, error = %e, "Dropped inbound packet");
                return;
            }
        };

        trace!(%from, kind = packet.kind().name(), "Decoded packet");

        match packet {
            Packet::Request(request) => {
                if self.ignore_requests {
                    trace!(%from, "Ignoring connection request");
                    return;
                }
                self.process_connection_request(&request, from);
            }
            Packet::Response {
                challenge_sequence,
                token,
            } => {
                if self.ignore_responses {
                    trace!(%from, "Ignoring connection response");
                    return;
                }
                self.process_connection_response(challenge_sequence, token, from);
            }
            Packet::KeepAlive { .. } => {
                if let Some(index) = slot_index {
                    self.mark_received(index);
                }
            }
            Packet::Payload(payload) => {
                if let Some(index) = slot_index {
                    self.mark_received(index);
                    self.enqueue_payload(index, payload);
                }
            }
            Packet::Disconnect => {
                if let Some(index) = slot_index {
                    info!(slot = index, %from, "Client sent disconnect");
                    self.release_client(index, DisconnectReason::ClientRequested);
                }
            }
            Packet::Denied | Packet::Challenge { .. } => {
                trace!(%from, "Ignoring client-bound packet type");
            }
        }
    }

    /// Advance the session clock to `time` seconds and run periodic work.
    pub fn update(&mut self, time: f64) {
        self.time = time;
        match unix_timestamp() {
            Ok(timestamp) => self.timestamp = timestamp,
            Err(e) => warn!(error = %e, "Keeping previous unix timestamp"),
        }
        if !self.running {
            return;
        }

        self.sessions.evict_expired(self.time, self.timestamp);
        self.send_keep_alives();
        self.check_timeouts();
    }

    /// Send `payload` to the client in slot `index`.
    ///
    /// # Errors
    /// `NotRunning`, `ClientNotConnected`, or an encode/transport failure.
    pub fn send_payload(&mut self, index: usize, payload: &[u8]) -> Result<()> {
        if !self.running {
            return Err(ProtocolError::NotRunning);
        }
        self.send_client_packet(index, &Packet::Payload(payload.to_vec()))
    }

    /// Pop the oldest payload received from slot `index`.
    pub fn receive_payload(&mut self, index: usize) -> Option<Vec<u8>> {
        self.sessions.slots.get_mut(index)?.inbound.pop_front()
    }

    /// Tell the client in slot `index` to go away and free the slot.
    ///
    /// # Errors
    /// `NotRunning` or `ClientNotConnected`.
    #[instrument(skip(self))]
    pub fn disconnect_client(&mut self, index: usize) -> Result<()> {
        if !self.running {
            return Err(ProtocolError::NotRunning);
        }
        if self.sessions.slots.get(index).is_none() {
            return Err(ProtocolError::ClientNotConnected(index));
        }
        self.disconnect(index, DisconnectReason::ServerRequested);
        Ok(())
    }

    /// Disconnect every connected client.
    pub fn disconnect_all(&mut self) {
        self.disconnect_all_with(DisconnectReason::ServerRequested);
    }

    /// Next session event, oldest first.
    ///
    /// At most `max_clients * EVENTS_PER_SLOT` events are kept; an
    /// application that stops polling loses the oldest ones.
    pub fn poll_event(&mut self) -> Option<ServerEvent> {
        self.events.pop_front()
    }

    pub fn set_ignore_requests(&mut self, ignore: bool) {
        self.ignore_requests = ignore;
    }

    pub fn set_ignore_responses(&mut self, ignore: bool) {
        self.ignore_responses = ignore;
    }

    pub fn set_allowed_packets(&mut self, allowed: AllowedPackets) {
        self.allowed_packets = allowed;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.connected_count()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn client(&self, index: usize) -> Option<&ClientSlot> {
        self.sessions.slots.get(index)
    }

    pub fn find_client_by_id(&self, client_id: u64) -> Option<usize> {
        self.sessions.find_slot_by_client_id(client_id)
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Next challenge sequence that will be issued.
    pub fn challenge_sequence(&self) -> u64 {
        self.challenge_sequence
    }

    /// Next server-global sequence that will be used.
    pub fn global_sequence(&self) -> u64 {
        self.global_sequence
    }

    /// Encode `packet` with the global sequence and send it.
    pub(super) fn send_global_packet(&mut self, packet: &Packet, key: &Key, to: SocketAddr) -> Result<()> {
        let mut out = [0u8; MAX_PACKET_BYTES];
        let n = encode(packet, self.global_sequence, key, self.protocol_id, &mut out)?;
        self.global_sequence += 1;
        self.transport.send_to(&out[..n], to)?;
        self.metrics.packet_sent(n as u64);
        Ok(())
    }

    /// Encode `packet` with the slot's key and sequence and send it.
    pub(super) fn send_client_packet(&mut self, index: usize, packet: &Packet) -> Result<()> {
        let slot = self
            .sessions
            .slots
            .get_mut(index)
            .ok_or(ProtocolError::ClientNotConnected(index))?;
        let sequence = slot.next_sequence();
        let mut out = [0u8; MAX_PACKET_BYTES];
        let n = encode(packet, sequence, &slot.send_key, self.protocol_id, &mut out)?;
        slot.last_send_time = self.time;
        let to = slot.address;
        self.transport.send_to(&out[..n], to)?;
        self.metrics.packet_sent(n as u64);
        Ok(())
    }

    pub(super) fn send_keep_alive(&mut self, index: usize) -> Result<()> {
        let packet = Packet::KeepAlive {
            client_index: index as u32,
            max_clients: self.max_clients as u32,
        };
        self.send_client_packet(index, &packet)
    }

    fn mark_received(&mut self, index: usize) {
        let now = self.time;
        if let Some(slot) = self.sessions.slots.get_mut(index) {
            slot.last_recv_time = now;
            if !slot.confirmed {
                slot.confirmed = true;
                info!(
                    client_id = slot.client_id,
                    slot = index,
                    address = %slot.address,
                    "Server confirmed connection to client"
                );
            }
        }
    }

    fn enqueue_payload(&mut self, index: usize, payload: Vec<u8>) {
        let limit = self.payload_queue_limit;
        let Some(slot) = self.sessions.slots.get_mut(index) else {
            return;
        };
        if slot.inbound.len() >= limit {
            debug!(slot = index, limit, "Inbound payload queue full, dropping packet");
            self.metrics.capacity_dropped();
            return;
        }
        slot.inbound.push_back(payload);
    }

    fn send_keep_alives(&mut self) {
        for index in self.sessions.slots.occupied_indices() {
            let due = self
                .sessions
                .slots
                .get(index)
                .is_some_and(|slot| slot.last_send_time + self.timeouts.keep_alive <= self.time);
            if due {
                if let Err(e) = self.send_keep_alive(index) {
                    debug!(slot = index, error = %e, "Failed to send keep-alive");
                }
            }
        }
    }

    fn check_timeouts(&mut self) {
        for index in self.sessions.slots.occupied_indices() {
            let timed_out = self
                .sessions
                .slots
                .get(index)
                .is_some_and(|slot| slot.last_recv_time + self.timeouts.client < self.time);
            if timed_out {
                info!(slot = index, "Client timed out");
                self.metrics.client_timed_out();
                self.disconnect(index, DisconnectReason::TimedOut);
            }
        }
    }

    fn disconnect_all_with(&mut self, reason: DisconnectReason) {
        for index in self.sessions.slots.occupied_indices() {
            self.disconnect(index, reason);
        }
    }

    /// Send the redundant disconnect burst, then release.
    fn disconnect(&mut self, index: usize, reason: DisconnectReason) {
        for _ in 0..NUM_DISCONNECT_PACKETS {
            if let Err(e) = self.send_client_packet(index, &Packet::Disconnect) {
                debug!(slot = index, error = %e, "Failed to send disconnect packet");
                break;
            }
        }
        self.release_client(index, reason);
    }

    fn release_client(&mut self, index: usize, reason: DisconnectReason) {
        let Some(slot) = self.sessions.release_slot(index) else {
            return;
        };
        self.metrics.connection_closed();
        info!(
            client_id = slot.client_id,
            slot = index,
            address = %slot.address,
            ?reason,
            "Client released"
        );
        self.push_event(ServerEvent::ClientDisconnected {
            client_index: index,
            client_id: slot.client_id,
            address: slot.address,
            reason,
        });
    }

    pub(super) fn push_event(&mut self, event: ServerEvent) {
        if self.events.len() >= self.event_limit {
            if let Some(dropped) = self.events.pop_front() {
                debug!(?dropped, "Event queue full, dropping oldest event");
            }
        }
        self.events.push_back(event);
    }
}
