//! Sliding-window replay protection for connected clients.
//!
//! The window holds [`REPLAY_WINDOW`] entries indexed by `sequence % size`,
//! each remembering the exact sequence last stored there. A sequence is
//! rejected when it is at or below `most_recent - REPLAY_WINDOW` or when its
//! entry already holds the same value.

/// Number of sequence numbers tracked behind the most recent one.
pub const REPLAY_WINDOW: usize = 256;

const EMPTY: u64 = u64::MAX;

/// Per-client duplicate and stale sequence filter.
#[derive(Debug, Clone)]
pub struct ReplayGuard {
    most_recent: u64,
    received: Box<[u64; REPLAY_WINDOW]>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self {
            most_recent: 0,
            received: Box::new([EMPTY; REPLAY_WINDOW]),
        }
    }

    /// Highest sequence accepted so far.
    pub fn most_recent(&self) -> u64 {
        self.most_recent
    }

    /// True if `sequence` must be rejected. Does not modify the window.
    pub fn already_received(&self, sequence: u64) -> bool {
        if sequence == EMPTY {
            return true;
        }
        if let Some(floor) = self.most_recent.checked_sub(REPLAY_WINDOW as u64) {
            if sequence <= floor {
                return true;
            }
        }
        self.received[Self::index(sequence)] == sequence
    }

    /// Record `sequence` as received.
    pub fn advance(&mut self, sequence: u64) {
        if sequence > self.most_recent {
            self.most_recent = sequence;
        }
        self.received[Self::index(sequence)] = sequence;
    }

    /// Check and record in one step; returns false for a replay.
    pub fn accept(&mut self, sequence: u64) -> bool {
        if self.already_received(sequence) {
            return false;
        }
        self.advance(sequence);
        true
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.most_recent = 0;
        self.received.fill(EMPTY);
    }

    #[inline]
    fn index(sequence: u64) -> usize {
        (sequence % REPLAY_WINDOW as u64) as usize
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}
