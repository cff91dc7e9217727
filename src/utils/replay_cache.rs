//! Replay cache for client public ephemerals.
//!
//! A login proof is bound to the server's one-shot ephemeral, so replaying an
//! old `(A, M1)` pair already fails verification. The cache additionally
//! rejects any client public value seen for the same identity within the
//! window, which stops an attacker from probing with a captured A.
//!
//! Values are stored as SHA-256 fingerprints; entries expire after the TTL and
//! the oldest are evicted first when the cache is full.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Key for cache entries: identity plus a digest of the public value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    identity: String,
    fingerprint: [u8; 32],
}

impl CacheKey {
    pub fn new(identity: &str, client_public: &[u8]) -> Self {
        Self {
            identity: identity.to_lowercase(),
            fingerprint: Sha256::digest(client_public).into(),
        }
    }
}

/// TTL-based replay cache with FIFO eviction
#[derive(Debug)]
pub struct ReplayCache {
    entries: HashMap<CacheKey, Instant>,
    /// Insertion order for O(1) eviction of the oldest entry
    insertion_order: VecDeque<CacheKey>,
    ttl: Duration,
    max_entries: usize,
}

impl ReplayCache {
    /// Default TTL: 5 minutes. Default max entries: 10,000.
    pub fn new() -> Self {
        Self::with_settings(Duration::from_secs(300), 10_000)
    }

    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Returns true if this public value was already presented for `identity`
    /// within the window. New values are recorded.
    #[instrument(skip(self, client_public))]
    pub fn is_replay(&mut self, identity: &str, client_public: &[u8]) -> bool {
        self.cleanup_expired();

        let key = CacheKey::new(identity, client_public);
        if self.entries.contains_key(&key) {
            warn!(identity, "Replayed client public value rejected");
            return true;
        }

        if self.entries.len() >= self.max_entries {
            let to_remove = self.entries.len() - self.max_entries + 1;
            self.remove_oldest_entries(to_remove);
        }

        self.entries.insert(key.clone(), Instant::now());
        self.insertion_order.push_back(key);
        false
    }

    fn cleanup_expired(&mut self) {
        let now = Instant::now();
        let initial_count = self.entries.len();

        self.entries
            .retain(|_, added_at| now.duration_since(*added_at) < self.ttl);

        while let Some(key) = self.insertion_order.front() {
            if self.entries.contains_key(key) {
                break;
            }
            self.insertion_order.pop_front();
        }

        let removed = initial_count - self.entries.len();
        if removed > 0 {
            debug!("Cleaned up {} expired replay cache entries", removed);
        }
    }

    #[inline]
    fn remove_oldest_entries(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(key) = self.insertion_order.pop_front() {
                self.entries.remove(&key);
            }
        }
        debug!(count, "Evicted oldest replay cache entries");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the replay cache
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_seconds: u64,
}
