//! Domain-scoped cache of catch-all detection results.
//!
//! Shared by all verifications running through one detector. Lock scope is
//! limited to individual map operations and guards are never held across an
//! await point, so concurrent verifications only contend briefly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, trace};
use serde::Serialize;

use super::{CatchAllConfidence, CatchAllDetectionResult};

/// Observable cache counters, exposed to the frontend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct CacheEntry {
    result: CatchAllDetectionResult,
    expires_at: Instant,
}

/// TTL + capacity bounded map from lowercased domain to detection result.
///
/// Indeterminate results are never stored. On insert at capacity, expired
/// entries go first; if that is not enough, the 10% of entries closest to
/// expiry are dropped.
pub struct DetectionCache {
    enabled: bool,
    ttl: Duration,
    max_size: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DetectionCache {
    pub fn new(enabled: bool, ttl: Duration, max_size: usize) -> Self {
        DetectionCache {
            enabled,
            ttl,
            max_size,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the unexpired entry for `domain`, evicting it if stale.
    pub fn get(&self, domain: &str) -> Option<CatchAllDetectionResult> {
        if !self.enabled {
            return None;
        }
        let key = domain.to_ascii_lowercase();

        let found = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .get(&key)
                .map(|entry| (entry.result.clone(), entry.expires_at))
        };

        match found {
            Some((result, expires_at)) if expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Catch-all cache hit for {}", key);
                Some(result)
            }
            Some(_) => {
                // Expired: evict on read.
                self.entries
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!("Catch-all cache entry for {} expired", key);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `result` under the lowercased domain.
    ///
    /// Indeterminate results are refused: they describe a failed analysis,
    /// not server behavior.
    pub fn put(&self, domain: &str, result: CatchAllDetectionResult) {
        if !self.enabled || result.confidence == CatchAllConfidence::Indeterminate {
            return;
        }
        let key = domain.to_ascii_lowercase();

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            evict_for_capacity(&mut entries, self.max_size);
        }
        entries.insert(
            key,
            CacheEntry {
                result,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            enabled: self.enabled,
            size: self.len(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// Makes room for one insert: expired entries first, then the 10% of
/// survivors with the earliest expiry.
fn evict_for_capacity(entries: &mut HashMap<String, CacheEntry>, max_size: usize) {
    let before = entries.len();
    let now = Instant::now();
    entries.retain(|_, entry| entry.expires_at > now);

    if entries.len() >= max_size {
        let mut by_expiry: Vec<(String, Instant)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

        let evict_count = (max_size / 10).max(1);
        for (key, _) in by_expiry.into_iter().take(evict_count) {
            entries.remove(&key);
        }
    }

    debug!(
        "Catch-all cache eviction: {} -> {} entries",
        before,
        entries.len()
    );
}
