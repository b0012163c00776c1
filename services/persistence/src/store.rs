//! Tiered Bar Store
//!
//! Cache in front of a durable repository.
//!
//! Consistency contract: whichever tier answers a `get`, the returned bar
//! hashes exactly like a repository-only read. Writes go to the repository
//! first and only then to the cache, so a repository failure is reported
//! to the caller and never masked by a cached copy. A cache miss reads
//! through to the repository and populates the cache.
//!
//! Writers (`save`, `archive_before`) take a store-wide write lock, so the
//! conflict check and the write it guards are one step. Reads never take it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::bar::{Bar, BarKey, BarState};
use types::config::RepositoryTarget;
use types::timeframe::Timeframe;

use crate::cache::{BarCache, CacheStats};
use crate::error::StoreError;
use crate::journal::{JournalBarRepository, JournalConfig};
use crate::repository::{BarRepository, MemoryBarRepository};

/// Outcome of a successful `save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Stored,
    /// Identical content was already stored.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub saves: u64,
    pub unchanged_saves: u64,
    pub archived: u64,
    pub cache: CacheStats,
    pub repository_len: usize,
}

pub struct TieredBarStore {
    cache: BarCache,
    repository: Arc<dyn BarRepository>,
    writes: Mutex<()>,
    saves: AtomicU64,
    unchanged_saves: AtomicU64,
    archived: AtomicU64,
}

impl TieredBarStore {
    pub fn new(repository: Arc<dyn BarRepository>, cache_capacity: usize) -> Self {
        info!(cache_capacity, "TieredBarStore initialized");
        Self {
            cache: BarCache::new(cache_capacity),
            repository,
            writes: Mutex::new(()),
            saves: AtomicU64::new(0),
            unchanged_saves: AtomicU64::new(0),
            archived: AtomicU64::new(0),
        }
    }

    /// Store over a fresh in-memory repository.
    pub fn in_memory(cache_capacity: usize) -> Self {
        Self::new(Arc::new(MemoryBarRepository::new()), cache_capacity)
    }

    /// Persist a confirmed bar in both tiers.
    ///
    /// FORMING bars are rejected. Re-saving a key whose stored content
    /// hashes differently is a `Conflict`; re-saving identical content is a
    /// no-op that keeps the stored lifecycle state. Concurrent saves of the
    /// same key are serialized: exactly one stores, the rest see its content.
    pub fn save(&self, bar: &Bar) -> Result<SaveOutcome, StoreError> {
        let key = bar.key();
        if bar.state() == BarState::Forming {
            return Err(StoreError::NotConfirmed {
                key,
                state: bar.state(),
            });
        }

        let _writes = self.write_lock()?;

        if let Some(stored) = self.repository.get(&key)? {
            let (stored_hash, new_hash) = (stored.hash(), bar.hash());
            if stored_hash != new_hash {
                warn!(
                    key = %key,
                    stored_hash = %stored_hash,
                    new_hash = %new_hash,
                    "Rejecting conflicting bar save"
                );
                return Err(StoreError::Conflict {
                    key,
                    stored_hash,
                    new_hash,
                });
            }
            self.unchanged_saves.fetch_add(1, Ordering::Relaxed);
            return Ok(SaveOutcome::Unchanged);
        }

        self.repository.put(bar)?;
        self.cache.put(bar.clone())?;
        self.saves.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Bar saved");
        Ok(SaveOutcome::Stored)
    }

    /// Save a sequence of bars, stopping at the first error.
    pub fn save_all<'a, I>(&self, bars: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = &'a Bar>,
    {
        let mut stored = 0;
        for bar in bars {
            if self.save(bar)? == SaveOutcome::Stored {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Cache first, then repository (populating the cache on a hit).
    pub fn get(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bar_index: i64,
    ) -> Result<Option<Bar>, StoreError> {
        let key = BarKey::new(symbol, timeframe, bar_index);
        if let Some(bar) = self.cache.get(&key)? {
            return Ok(Some(bar));
        }
        match self.repository.get(&key)? {
            Some(bar) => {
                self.cache.put(bar.clone())?;
                Ok(Some(bar))
            }
            None => Ok(None),
        }
    }

    /// Bars with `start_ms <= ts_start_ms < end_ms`, ascending `bar_index`.
    /// Always served by the repository.
    pub fn get_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Bar>, StoreError> {
        self.repository.range(symbol, timeframe, start_ms, end_ms)
    }

    /// Move CONFIRMED bars with `bar_index < before_index` to HISTORICAL and
    /// evict them from the cache. Returns how many were archived.
    pub fn archive_before(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        before_index: i64,
    ) -> Result<usize, StoreError> {
        let _writes = self.write_lock()?;
        let mut archived = 0;
        for mut bar in self.repository.series(symbol, timeframe)? {
            if bar.bar_index() >= before_index {
                break;
            }
            if bar.state() != BarState::Confirmed {
                continue;
            }
            bar.to_historical()?;
            self.repository.put(&bar)?;
            self.cache.remove(&bar.key())?;
            archived += 1;
        }
        if archived > 0 {
            self.archived.fetch_add(archived as u64, Ordering::Relaxed);
            info!(
                symbol = %symbol,
                timeframe = %timeframe,
                before_index,
                archived,
                "Archived bars"
            );
        }
        Ok(archived)
    }

    fn write_lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.writes
            .lock()
            .map_err(|_| StoreError::LockPoisoned("store writes"))
    }

    /// Drop the cache tier. The repository is untouched.
    pub fn clear_cache(&self) -> Result<(), StoreError> {
        self.cache.clear()
    }

    pub fn repository(&self) -> &Arc<dyn BarRepository> {
        &self.repository
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            saves: self.saves.load(Ordering::Relaxed),
            unchanged_saves: self.unchanged_saves.load(Ordering::Relaxed),
            archived: self.archived.load(Ordering::Relaxed),
            cache: self.cache.stats()?,
            repository_len: self.repository.len()?,
        })
    }
}

/// Build a store for the configured repository target.
pub fn open_store(
    target: &RepositoryTarget,
    cache_capacity: usize,
) -> Result<TieredBarStore, StoreError> {
    let repository: Arc<dyn BarRepository> = match target {
        RepositoryTarget::Memory => Arc::new(MemoryBarRepository::new()),
        RepositoryTarget::Journal { dir } => {
            Arc::new(JournalBarRepository::open(JournalConfig::new(dir))?)
        }
    };
    Ok(TieredBarStore::new(repository, cache_capacity))
}
