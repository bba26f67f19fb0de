//! Decision cache with lazy TTL expiry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

/// Wildcard accepted by [`PolicyCache::invalidate`]
pub const MATCH_ALL: &str = "*";

/// A cached value with its expiry
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub expires_at: Instant,
    hit_count: AtomicU64,
}

impl<V> CacheEntry<V> {
    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Fixed-capacity map of memoized decisions.
///
/// Expired entries are treated as misses on read and are only dropped when
/// overwritten or evicted. At capacity the entry closest to expiry is evicted.
#[derive(Debug)]
pub struct PolicyCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    max_size: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> PolicyCache<V> {
    /// A `max_size` of zero disables caching
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                entry.hit_count.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: String, value: V, ttl: Duration) {
        self.insert_if(key, value, ttl, || true);
    }

    /// Insert only if `guard` still holds once the write lock is taken.
    /// Returns whether the value was stored.
    pub fn insert_if(
        &self,
        key: String,
        value: V,
        ttl: Duration,
        guard: impl FnOnce() -> bool,
    ) -> bool {
        if self.max_size == 0 {
            return false;
        }
        let mut entries = self.entries.write();
        if !guard() {
            return false;
        }
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            Self::evict_nearest_expiry(&mut entries);
        }
        let entry = CacheEntry {
            key: key.clone(),
            value,
            expires_at: Instant::now() + ttl,
            hit_count: AtomicU64::new(0),
        };
        entries.insert(key, entry);
        true
    }

    fn evict_nearest_expiry(entries: &mut HashMap<String, CacheEntry<V>>) {
        let nearest = entries
            .values()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key.clone());
        if let Some(key) = nearest {
            entries.remove(&key);
        }
    }

    /// Remove every key containing `pattern`, or everything for [`MATCH_ALL`].
    /// Returns the number of entries removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        if pattern == MATCH_ALL {
            entries.clear();
        } else {
            entries.retain(|key, _| !key.contains(pattern));
        }
        before - entries.len()
    }

    pub fn clear(&self) {
        self.invalidate(MATCH_ALL);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hits recorded against one key
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.entries.read().get(key).map(CacheEntry::hit_count)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
