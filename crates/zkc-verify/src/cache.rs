//! TTL-bounded verification result cache keyed by proof id, with
//! hit/miss accounting. Entries expire lazily on lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`; 0.0 before any lookup.
    pub hit_rate: f64,
    pub entries: usize,
}

struct CacheEntry {
    valid: bool,
    inserted: Instant,
}

/// Verification results with a fixed time-to-live.
pub struct VerificationCache {
    ttl: Duration,
    entries: DashMap<Uuid, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl VerificationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached verdict for `proof_id`, if present and fresh. Expired
    /// entries are removed and counted as misses.
    pub fn get(&self, proof_id: &Uuid) -> Option<bool> {
        let fresh = match self.entries.get(proof_id) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.valid),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match fresh {
            Some(valid) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(valid)
            }
            None => {
                self.entries.remove(proof_id);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, proof_id: Uuid, valid: bool) {
        self.entries.insert(
            proof_id,
            CacheEntry {
                valid,
                inserted: Instant::now(),
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            entries: self.entries.len(),
        }
    }

    /// Drop all entries. Counters are kept.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
