//! Multi-symbol bar engine
//!
//! Routes each tick to a dedicated per-symbol `BarEngine`, created lazily on
//! the first tick for a new symbol. Engines share no mutable state, so one
//! symbol can never corrupt another. Confirmed bars from every symbol are
//! fanned into a single observer list.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::debug;

use types::bar::Bar;
use types::observer::Observers;
use types::tick::CanonicalTick;

use crate::engine::{BarEngine, EngineConfig, EngineStats};
use crate::error::EngineError;

pub struct MultiSymbolBarEngine {
    config: EngineConfig,
    /// Per-symbol engines (BTreeMap so shutdown order is deterministic).
    engines: BTreeMap<String, BarEngine>,
    observers: Observers<Bar>,
}

impl MultiSymbolBarEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            engines: BTreeMap::new(),
            observers: Observers::new(),
        }
    }

    pub fn on_confirmed<F>(&mut self, callback: F)
    where
        F: FnMut(&Bar) + Send + 'static,
    {
        self.observers.register(callback);
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Bar> {
        self.observers.subscribe()
    }

    /// Route a tick to its symbol's engine.
    pub fn process_tick(&mut self, tick: &CanonicalTick) -> Result<Vec<Bar>, EngineError> {
        let config = &self.config;
        let engine = self
            .engines
            .entry(tick.symbol.clone())
            .or_insert_with(|| {
                debug!(symbol = %tick.symbol, "Creating engine for new symbol");
                BarEngine::new(tick.symbol.clone(), config.clone())
            });
        let confirmed = engine.process_tick(tick)?;
        self.observers.notify_all(&confirmed);
        Ok(confirmed)
    }

    /// Clock-driven confirmation across all symbols, in symbol order.
    pub fn close_elapsed(&mut self, now_ms: i64) -> Result<Vec<Bar>, EngineError> {
        let mut confirmed = Vec::new();
        for engine in self.engines.values_mut() {
            confirmed.extend(engine.close_elapsed(now_ms)?);
        }
        self.observers.notify_all(&confirmed);
        Ok(confirmed)
    }

    /// Confirm every forming bar of every symbol, in symbol order.
    pub fn force_confirm_all(&mut self) -> Result<Vec<Bar>, EngineError> {
        let mut confirmed = Vec::new();
        for engine in self.engines.values_mut() {
            confirmed.extend(engine.force_confirm_all()?);
        }
        self.observers.notify_all(&confirmed);
        Ok(confirmed)
    }

    pub fn engine(&self, symbol: &str) -> Option<&BarEngine> {
        self.engines.get(symbol)
    }

    /// Symbols seen so far, sorted.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    /// Counters summed over every symbol.
    pub fn stats(&self) -> EngineStats {
        let mut total = EngineStats::default();
        for engine in self.engines.values() {
            total += engine.stats();
        }
        total
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
