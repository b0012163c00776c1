//! Bar repository
//!
//! Durable tier of the store.
//!
//! A repository is the source of truth for confirmed bars, keyed by
//! `(symbol, timeframe, bar_index)`. Implementations must serialize writes
//! to the same key; writes to different keys may proceed concurrently.
//! Network-backed implementations own their timeout and retry policy and
//! report failures as errors, never as "not found".

use std::collections::BTreeMap;
use std::sync::RwLock;

use types::bar::{Bar, BarKey};
use types::timeframe::Timeframe;

use crate::error::StoreError;

pub trait BarRepository: Send + Sync {
    /// Insert or overwrite a bar.
    fn put(&self, bar: &Bar) -> Result<(), StoreError>;

    fn get(&self, key: &BarKey) -> Result<Option<Bar>, StoreError>;

    /// Every stored bar of one series, ascending `bar_index`.
    fn series(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, StoreError>;

    /// Number of stored bars.
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Bars with `start_ms <= ts_start_ms < end_ms`, ascending `bar_index`.
    fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Bar>, StoreError> {
        Ok(self
            .series(symbol, timeframe)?
            .into_iter()
            .filter(|bar| bar.ts_start_ms() >= start_ms && bar.ts_start_ms() < end_ms)
            .collect())
    }
}

/// Key bounds covering a whole `(symbol, timeframe)` series.
pub(crate) fn series_bounds(symbol: &str, timeframe: Timeframe) -> (BarKey, BarKey) {
    (
        BarKey::new(symbol, timeframe, i64::MIN),
        BarKey::new(symbol, timeframe, i64::MAX),
    )
}

/// In-process repository over a sorted map.
#[derive(Default)]
pub struct MemoryBarRepository {
    bars: RwLock<BTreeMap<BarKey, Bar>>,
}

impl MemoryBarRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BarRepository for MemoryBarRepository {
    fn put(&self, bar: &Bar) -> Result<(), StoreError> {
        let mut bars = self
            .bars
            .write()
            .map_err(|_| StoreError::LockPoisoned("memory repository"))?;
        bars.insert(bar.key(), bar.clone());
        Ok(())
    }

    fn get(&self, key: &BarKey) -> Result<Option<Bar>, StoreError> {
        let bars = self
            .bars
            .read()
            .map_err(|_| StoreError::LockPoisoned("memory repository"))?;
        Ok(bars.get(key).cloned())
    }

    fn series(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, StoreError> {
        let bars = self
            .bars
            .read()
            .map_err(|_| StoreError::LockPoisoned("memory repository"))?;
        let (lo, hi) = series_bounds(symbol, timeframe);
        Ok(bars.range(lo..=hi).map(|(_, bar)| bar.clone()).collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let bars = self
            .bars
            .read()
            .map_err(|_| StoreError::LockPoisoned("memory repository"))?;
        Ok(bars.len())
    }
}
