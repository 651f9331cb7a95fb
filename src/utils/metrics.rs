//! Observability and Metrics
//!
//! Counters for handshake progress, admission decisions and packet drops.
//! One [`Metrics`] instance is owned by each server so that several servers
//! in one process (tests, sharded deployments) keep separate books.
//!
//! Uses atomic counters so a snapshot can be taken from another thread
//! through a shared reference while the engine keeps running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one server instance
#[derive(Debug)]
pub struct Metrics {
    /// Datagrams handed to the server
    pub packets_received: AtomicU64,
    /// Datagrams handed to the transport
    pub packets_sent: AtomicU64,
    /// Bytes received
    pub bytes_received: AtomicU64,
    /// Bytes sent
    pub bytes_sent: AtomicU64,
    /// Connection requests that decoded successfully
    pub requests_received: AtomicU64,
    /// Challenge packets sent
    pub challenges_sent: AtomicU64,
    /// Connection responses that decoded successfully
    pub responses_received: AtomicU64,
    /// Denied packets sent
    pub denied_sent: AtomicU64,
    /// Clients promoted into a slot
    pub connections_total: AtomicU64,
    /// Clients currently occupying a slot
    pub connections_active: AtomicU64,
    /// Clients released because they stopped sending
    pub timeouts: AtomicU64,
    /// Datagrams dropped because they failed to decode or authenticate
    pub malformed_dropped: AtomicU64,
    /// Datagrams dropped by the replay guard
    pub replays_dropped: AtomicU64,
    /// Requests or responses dropped by admission policy
    pub policy_dropped: AtomicU64,
    /// Requests dropped because a table was full
    pub capacity_dropped: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            requests_received: AtomicU64::new(0),
            challenges_sent: AtomicU64::new(0),
            responses_received: AtomicU64::new(0),
            denied_sent: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            malformed_dropped: AtomicU64::new(0),
            replays_dropped: AtomicU64::new(0),
            policy_dropped: AtomicU64::new(0),
            capacity_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an inbound datagram
    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record an outbound datagram
    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn challenge_sent(&self) {
        self.challenges_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_received(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn denied_sent(&self) {
        self.denied_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a client promoted into a slot
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a slot released
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn client_timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_dropped(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_dropped(&self) {
        self.replays_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn policy_dropped(&self) {
        self.policy_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn capacity_dropped(&self) {
        self.capacity_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            challenges_sent: self.challenges_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            denied_sent: self.denied_sent.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            replays_dropped: self.replays_dropped.load(Ordering::Relaxed),
            policy_dropped: self.policy_dropped.load(Ordering::Relaxed),
            capacity_dropped: self.capacity_dropped.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            packets_received = snapshot.packets_received,
            packets_sent = snapshot.packets_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            requests_received = snapshot.requests_received,
            challenges_sent = snapshot.challenges_sent,
            responses_received = snapshot.responses_received,
            denied_sent = snapshot.denied_sent,
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            timeouts = snapshot.timeouts,
            malformed_dropped = snapshot.malformed_dropped,
            replays_dropped = snapshot.replays_dropped,
            policy_dropped = snapshot.policy_dropped,
            capacity_dropped = snapshot.capacity_dropped,
            uptime_seconds = snapshot.uptime_seconds,
            "Server metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub requests_received: u64,
    pub challenges_sent: u64,
    pub responses_received: u64,
    pub denied_sent: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    pub timeouts: u64,
    pub malformed_dropped: u64,
    pub replays_dropped: u64,
    pub policy_dropped: u64,
    pub capacity_dropped: u64,
    pub uptime_seconds: u64,
}
