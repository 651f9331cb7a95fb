//! Token Fingerprint History
//!
//! Records the fingerprint of every connect token the server has accepted
//! so that the same token can never open a second handshake. An entry lives
//! until the token's own expire timestamp, after which the token would be
//! rejected by the request decoder anyway.
//!
//! The history is bounded. When it is full of live entries, new tokens are
//! refused rather than older fingerprints being forgotten.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::core::token::TokenFingerprint;

#[derive(Debug, Clone)]
struct HistoryEntry {
    address: SocketAddr,
    recorded_at: f64,
    expire_timestamp: u64,
}

/// Bounded set of consumed connect tokens.
#[derive(Debug)]
pub struct TokenHistory {
    entries: HashMap<TokenFingerprint, HistoryEntry>,
    capacity: usize,
}

impl TokenHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `fingerprint` if it has never been seen.
    ///
    /// Returns false if the fingerprint is already recorded or if the
    /// history has no room for it; nothing is inserted in either case.
    pub fn find_or_insert(
        &mut self,
        fingerprint: TokenFingerprint,
        address: SocketAddr,
        now: f64,
        expire_timestamp: u64,
        current_timestamp: u64,
    ) -> bool {
        if let Some(entry) = self.entries.get(&fingerprint) {
            debug!(
                first_seen_from = %entry.address,
                first_seen_at = entry.recorded_at,
                %address,
                "Connect token fingerprint already recorded"
            );
            return false;
        }

        if self.entries.len() >= self.capacity && self.evict_expired(current_timestamp) == 0 {
            warn!(capacity = self.capacity, "Token history full of live entries");
            return false;
        }

        self.entries.insert(
            fingerprint,
            HistoryEntry {
                address,
                recorded_at: now,
                expire_timestamp,
            },
        );
        true
    }

    /// Forget fingerprints whose tokens have expired.
    pub fn evict_expired(&mut self, current_timestamp: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.expire_timestamp > current_timestamp);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Evicted expired token fingerprints");
        }
        removed
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            entries: self.entries.len(),
            capacity: self.capacity,
        }
    }
}

/// Statistics about the token history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStats {
    /// Current number of entries
    pub entries: usize,
    /// Maximum allowed entries
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], 5000))
    }

    #[test]
    fn test_single_use() {
        let mut history = TokenHistory::new(8);
        let fp = TokenFingerprint([1; 16]);
        assert!(history.find_or_insert(fp, addr(), 0.0, 100, 10));
        assert!(!history.find_or_insert(fp, addr(), 1.0, 100, 11));
        assert_eq!(history.stats().entries, 1);
    }

    #[test]
    fn test_full_history_fails_closed() {
        let mut history = TokenHistory::new(2);
        assert!(history.find_or_insert(TokenFingerprint([1; 16]), addr(), 0.0, 100, 10));
        assert!(history.find_or_insert(TokenFingerprint([2; 16]), addr(), 0.0, 200, 10));
        assert!(!history.find_or_insert(TokenFingerprint([3; 16]), addr(), 0.0, 300, 10));
        assert_eq!(history.stats().entries, 2);

        // first token has expired by unix time 100
        assert!(history.find_or_insert(TokenFingerprint([3; 16]), addr(), 0.0, 300, 100));
        assert_eq!(history.stats().entries, 2);
        assert!(!history.find_or_insert(TokenFingerprint([2; 16]), addr(), 0.0, 200, 100));
    }
}
