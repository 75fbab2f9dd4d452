//! In-memory cache tier.
//!
//! Non-pinned entries live in an LRU list bounded by item count and total
//! bytes; pinned entries live in a side map outside the eviction accounting.

use std::collections::HashMap;
use std::time::SystemTime;

use lru::LruCache;
use serde::Serialize;

use super::entry::CacheEntry;

/// Size and occupancy of the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryUsage {
    /// All entries, pinned included.
    pub items: usize,
    /// Bytes of all entries, pinned included.
    pub bytes: u64,
    /// Pinned entries.
    pub pinned_items: usize,
}

/// LRU memory tier. Not synchronized; the owner wraps it in a mutex.
#[derive(Debug)]
pub struct MemoryTier {
    lru: LruCache<String, CacheEntry>,
    pinned: HashMap<String, CacheEntry>,
    max_items: usize,
    max_bytes: u64,
    lru_bytes: u64,
    pinned_bytes: u64,
}

impl MemoryTier {
    /// Creates an empty tier bounded by `max_items` and `max_bytes`
    /// (non-pinned entries only).
    #[must_use]
    pub fn new(max_items: usize, max_bytes: u64) -> Self {
        Self {
            lru: LruCache::unbounded(),
            pinned: HashMap::new(),
            max_items: max_items.max(1),
            max_bytes,
            lru_bytes: 0,
            pinned_bytes: 0,
        }
    }

    /// Returns a copy of the entry for `key`, marking it most recently used.
    pub fn get(&mut self, key: &str, now: SystemTime) -> Option<CacheEntry> {
        if let Some(entry) = self.lru.get_mut(key) {
            entry.last_access = now;
            return Some(entry.clone());
        }
        self.pinned.get_mut(key).map(|entry| {
            entry.last_access = now;
            entry.clone()
        })
    }

    /// Returns `true` if `key` is present in either map.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lru.contains(key) || self.pinned.contains_key(key)
    }

    /// Inserts or replaces an entry and returns the keys evicted to make room.
    ///
    /// Replacing a pinned entry keeps the pin; only [`set_pinned`](Self::set_pinned)
    /// clears it.
    pub fn insert(&mut self, mut entry: CacheEntry) -> Vec<String> {
        if self.remove(&entry.key).is_some_and(|old| old.pinned) {
            entry.pinned = true;
        }
        if entry.pinned {
            self.pinned_bytes += entry.size_bytes;
            self.pinned.insert(entry.key.clone(), entry);
            return Vec::new();
        }
        self.lru_bytes += entry.size_bytes;
        self.lru.put(entry.key.clone(), entry);
        self.enforce_bounds()
    }

    /// Removes `key` from the tier.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.lru.pop(key) {
            self.lru_bytes -= entry.size_bytes;
            return Some(entry);
        }
        let entry = self.pinned.remove(key)?;
        self.pinned_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Pins or unpins `key`. Returns `false` if the key is not present.
    ///
    /// Unpinning makes the entry most recently used and may evict others.
    pub fn set_pinned(&mut self, key: &str, pinned: bool) -> (bool, Vec<String>) {
        let Some(mut entry) = self.remove(key) else {
            return (false, Vec::new());
        };
        entry.pinned = pinned;
        (true, self.insert(entry))
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn purge_expired(&mut self, now: SystemTime) -> usize {
        let expired: Vec<String> = self
            .lru
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Drops everything, pinned entries included.
    pub fn clear(&mut self) {
        self.lru.clear();
        self.pinned.clear();
        self.lru_bytes = 0;
        self.pinned_bytes = 0;
    }

    /// Current occupancy.
    #[must_use]
    pub fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            items: self.lru.len() + self.pinned.len(),
            bytes: self.lru_bytes + self.pinned_bytes,
            pinned_items: self.pinned.len(),
        }
    }

    fn enforce_bounds(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.lru.len() > self.max_items || self.lru_bytes > self.max_bytes {
            let Some((key, entry)) = self.lru.pop_lru() else {
                break;
            };
            self.lru_bytes -= entry.size_bytes;
            evicted.push(key);
        }
        evicted
    }
}
