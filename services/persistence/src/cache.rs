//! Bar Cache
//!
//! Capacity-bounded LRU fast path.
//!
//! Shared by every symbol engine, so all access goes through one mutex.
//! Recency is a monotonically increasing stamp per entry; the entry with the
//! smallest stamp is evicted first. Eviction never loses data because the
//! repository behind the cache is the source of truth.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use types::bar::{Bar, BarKey};

use crate::error::StoreError;

// ── Stats ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

// ── LRU ─────────────────────────────────────────────────────────────

struct LruState {
    entries: HashMap<BarKey, (Bar, u64)>,
    /// stamp → key, oldest first.
    recency: BTreeMap<u64, BarKey>,
    next_stamp: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl LruState {
    fn touch(&mut self, key: &BarKey) {
        let stamp = self.next_stamp;
        if let Some((_, old)) = self.entries.get_mut(key) {
            self.recency.remove(old);
            *old = stamp;
            self.recency.insert(stamp, key.clone());
            self.next_stamp += 1;
        }
    }
}

pub struct BarCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl BarCache {
    /// Create a cache holding at most `capacity` bars (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(LruState {
                entries: HashMap::with_capacity(capacity),
                recency: BTreeMap::new(),
                next_stamp: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned("bar cache"))
    }

    /// Look up a bar, marking it most recently used.
    pub fn get(&self, key: &BarKey) -> Result<Option<Bar>, StoreError> {
        let mut state = self.lock()?;
        let found = state.entries.get(key).map(|(bar, _)| bar.clone());
        match found {
            Some(bar) => {
                state.hits += 1;
                state.touch(key);
                Ok(Some(bar))
            }
            None => {
                state.misses += 1;
                Ok(None)
            }
        }
    }

    /// Insert or replace a bar, evicting the least recently used entry when
    /// full.
    pub fn put(&self, bar: Bar) -> Result<(), StoreError> {
        let key = bar.key();
        let mut state = self.lock()?;

        let stamp = state.next_stamp;
        state.next_stamp += 1;
        if let Some((_, old)) = state.entries.insert(key.clone(), (bar, stamp)) {
            state.recency.remove(&old);
        }
        state.recency.insert(stamp, key);

        while state.entries.len() > self.capacity {
            let Some((_, oldest)) = state.recency.pop_first() else {
                break;
            };
            state.entries.remove(&oldest);
            state.evictions += 1;
        }
        Ok(())
    }

    pub fn remove(&self, key: &BarKey) -> Result<Option<Bar>, StoreError> {
        let mut state = self.lock()?;
        match state.entries.remove(key) {
            Some((bar, stamp)) => {
                state.recency.remove(&stamp);
                Ok(Some(bar))
            }
            None => Ok(None),
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.entries.clear();
        state.recency.clear();
        Ok(())
    }

    pub fn contains(&self, key: &BarKey) -> Result<bool, StoreError> {
        Ok(self.lock()?.entries.contains_key(key))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> Result<CacheStats, StoreError> {
        let state = self.lock()?;
        Ok(CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            len: state.entries.len(),
            capacity: self.capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::timeframe::Timeframe;

    fn bar(index: i64) -> Bar {
        let mut bar = Bar::new("AAPL", Timeframe::M1, index, index * 60_000, (index + 1) * 60_000);
        bar.confirm().unwrap();
        bar
    }

    fn key(index: i64) -> BarKey {
        BarKey::new("AAPL", Timeframe::M1, index)
    }

    #[test]
    fn test_put_get() {
        let cache = BarCache::new(4);
        cache.put(bar(1)).unwrap();
        assert_eq!(cache.get(&key(1)).unwrap(), Some(bar(1)));
        assert_eq!(cache.get(&key(2)).unwrap(), None);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = BarCache::new(2);
        cache.put(bar(1)).unwrap();
        cache.put(bar(2)).unwrap();
        // touch 1 so 2 becomes the eviction candidate
        cache.get(&key(1)).unwrap();
        cache.put(bar(3)).unwrap();

        assert!(cache.contains(&key(1)).unwrap());
        assert!(!cache.contains(&key(2)).unwrap());
        assert!(cache.contains(&key(3)).unwrap());
        assert_eq!(cache.stats().unwrap().evictions, 1);
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let cache = BarCache::new(2);
        cache.put(bar(1)).unwrap();
        cache.put(bar(2)).unwrap();
        cache.put(bar(2)).unwrap();
        assert_eq!(cache.len().unwrap(), 2);
        assert_eq!(cache.stats().unwrap().evictions, 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = BarCache::new(8);
        for i in 0..5 {
            cache.put(bar(i)).unwrap();
        }
        assert_eq!(cache.remove(&key(3)).unwrap(), Some(bar(3)));
        assert_eq!(cache.remove(&key(3)).unwrap(), None);
        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = BarCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(bar(1)).unwrap();
        cache.put(bar(2)).unwrap();
        assert_eq!(cache.len().unwrap(), 1);
    }
}
