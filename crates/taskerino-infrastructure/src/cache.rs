//! Byte-bounded LRU cache for serialized entities.
//!
//! Recency order comes from `lru::LruCache`; the byte budget is enforced here.
//! Hit, miss and eviction counters are atomics so telemetry can be read
//! without taking the entry lock.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use taskerino_core::storage::CacheStats;

/// Cache key for an entity.
pub fn cache_key(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, id)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Vec<u8>>,
    size_bytes: u64,
    last_access: DateTime<Utc>,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    size: u64,
    max_size: u64,
}

impl CacheState {
    /// Evicts least-recently-used entries until `size <= max_size`.
    fn evict_to_budget(&mut self) -> u64 {
        let mut evicted = 0;
        while self.size > self.max_size {
            match self.entries.pop_lru() {
                Some((key, entry)) => {
                    self.size -= entry.size_bytes;
                    evicted += 1;
                    tracing::trace!("[EntityCache] Evicted {} ({} bytes)", key, entry.size_bytes);
                }
                None => break,
            }
        }
        evicted
    }
}

pub struct EntityCache {
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl EntityCache {
    pub fn new(max_size: u64) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                size: 0,
                max_size,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the cached value and marks it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut state = self.lock();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = Utc::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces a value, evicting LRU entries over budget.
    ///
    /// A value larger than the whole budget is not cached; any previous value
    /// under the same key is dropped so stale data is never served.
    pub fn put(&self, key: impl Into<String>, value: Arc<Vec<u8>>) {
        let key = key.into();
        let size_bytes = value.len() as u64;
        let mut state = self.lock();

        if let Some(old) = state.entries.pop(&key) {
            state.size -= old.size_bytes;
        }

        if size_bytes > state.max_size {
            tracing::debug!(
                "[EntityCache] Not caching {} ({} bytes exceeds budget {})",
                key,
                size_bytes,
                state.max_size
            );
            return;
        }

        state.entries.put(
            key,
            CacheEntry {
                value,
                size_bytes,
                last_access: Utc::now(),
            },
        );
        state.size += size_bytes;

        let evicted = state.evict_to_budget();
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.lock();
        match state.entries.pop(key) {
            Some(entry) => {
                state.size -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Returns the cached value without touching recency or counters.
    pub fn peek(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.lock().entries.peek(key).map(|entry| Arc::clone(&entry.value))
    }

    /// Presence check that does not touch recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains(key)
    }

    /// Changes the byte budget, evicting immediately when shrinking.
    pub fn set_max_size(&self, max_size: u64) {
        let mut state = self.lock();
        state.max_size = max_size;
        let evicted = state.evict_to_budget();
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!(
                "[EntityCache] Budget lowered to {} bytes, evicted {} entries",
                max_size,
                evicted
            );
        }
    }

    /// Drops all entries. Counters are left alone.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.size = 0;
    }

    /// Zeroes hit/miss/eviction counters. Entries are left alone.
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: state.size,
            max_size: state.max_size,
            items: state.entries.len() as u64,
            oldest_entry: state.entries.peek_lru().map(|(_, e)| e.last_access),
            newest_entry: state.entries.peek_mru().map(|(_, e)| e.last_access),
        }
    }

    #[cfg(test)]
    fn summed_entry_sizes(&self) -> u64 {
        self.lock().entries.iter().map(|(_, e)| e.size_bytes).sum()
    }
}
