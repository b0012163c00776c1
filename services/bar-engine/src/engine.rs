//! Single-symbol, multi-timeframe bar engine
//!
//! Owns exactly one FORMING bar per configured timeframe. For each tick and
//! each timeframe the session calendar yields the bar window:
//!
//! - same index as the forming bar: apply the tick
//! - higher index: confirm the forming bar, open the new one, apply
//! - lower index (or already confirmed): late, dropped
//! - no window (market closed): out of session, dropped
//!
//! Windows are looked up directly from the calendar, so gaps over nights,
//! weekends and holidays are skipped without materializing empty bars.
//! Confirmed bars are delivered to observers exactly once, shortest
//! timeframe first, and per timeframe in strictly increasing `bar_index`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use types::bar::Bar;
use types::calendar::SessionCalendar;
use types::config::CoreConfig;
use types::errors::ConfigError;
use types::observer::Observers;
use types::tick::CanonicalTick;
use types::timeframe::Timeframe;

use crate::error::EngineError;

/// Engine configuration shared by every symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub timeframes: BTreeSet<Timeframe>,
    pub calendar: Arc<SessionCalendar>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeframes: BTreeSet::from([Timeframe::M1]),
            calendar: Arc::new(SessionCalendar::Continuous),
        }
    }
}

impl EngineConfig {
    pub fn new(timeframes: impl IntoIterator<Item = Timeframe>, calendar: SessionCalendar) -> Self {
        Self {
            timeframes: timeframes.into_iter().collect(),
            calendar: Arc::new(calendar),
        }
    }
}

impl TryFrom<&CoreConfig> for EngineConfig {
    type Error = ConfigError;

    fn try_from(config: &CoreConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            timeframes: config.timeframe_set(),
            calendar: Arc::new(config.calendar.build()?),
        })
    }
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub ticks_processed: u64,
    pub bars_confirmed: u64,
    /// Counted once per (tick, timeframe) whose window was already passed.
    pub late_ticks_dropped: u64,
    pub out_of_session_dropped: u64,
}

impl AddAssign for EngineStats {
    fn add_assign(&mut self, other: Self) {
        self.ticks_processed += other.ticks_processed;
        self.bars_confirmed += other.bars_confirmed;
        self.late_ticks_dropped += other.late_ticks_dropped;
        self.out_of_session_dropped += other.out_of_session_dropped;
    }
}

pub struct BarEngine {
    symbol: String,
    config: EngineConfig,
    /// One FORMING bar per timeframe (BTreeMap for deterministic order).
    forming: BTreeMap<Timeframe, Bar>,
    /// Highest confirmed index per timeframe; windows at or below are closed.
    last_confirmed: BTreeMap<Timeframe, i64>,
    observers: Observers<Bar>,
    stats: EngineStats,
}

impl BarEngine {
    pub fn new(symbol: impl Into<String>, config: EngineConfig) -> Self {
        let symbol = symbol.into();
        info!(
            symbol = %symbol,
            timeframes = ?config.timeframes,
            "BarEngine initialized"
        );
        Self {
            symbol,
            config,
            forming: BTreeMap::new(),
            last_confirmed: BTreeMap::new(),
            observers: Observers::new(),
            stats: EngineStats::default(),
        }
    }

    /// Register a callback for confirmed bars.
    pub fn on_confirmed<F>(&mut self, callback: F)
    where
        F: FnMut(&Bar) + Send + 'static,
    {
        self.observers.register(callback);
    }

    /// Channel subscription for confirmed bars.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Bar> {
        self.observers.subscribe()
    }

    /// Apply one tick to every configured timeframe.
    ///
    /// Returns the bars this tick confirmed (already delivered to observers).
    pub fn process_tick(&mut self, tick: &CanonicalTick) -> Result<Vec<Bar>, EngineError> {
        if tick.symbol != self.symbol {
            return Err(EngineError::SymbolMismatch {
                engine_symbol: self.symbol.clone(),
                tick_symbol: tick.symbol.clone(),
            });
        }
        self.stats.ticks_processed += 1;

        let mut confirmed = Vec::new();
        let timeframes: Vec<Timeframe> = self.config.timeframes.iter().copied().collect();

        for timeframe in timeframes {
            let Some(window) = self.config.calendar.window(tick.ts_ms, timeframe) else {
                // Session membership does not depend on the timeframe.
                self.stats.out_of_session_dropped += 1;
                debug!(
                    symbol = %self.symbol,
                    ts_ms = tick.ts_ms,
                    "Dropping out-of-session tick"
                );
                break;
            };

            let closed_up_to = self.last_confirmed.get(&timeframe).copied();
            let current = self.forming.get(&timeframe).map(Bar::bar_index);
            let is_late = closed_up_to.is_some_and(|idx| window.bar_index <= idx)
                || current.is_some_and(|idx| window.bar_index < idx);
            if is_late {
                self.stats.late_ticks_dropped += 1;
                debug!(
                    symbol = %self.symbol,
                    timeframe = %timeframe,
                    bar_index = window.bar_index,
                    ts_ms = tick.ts_ms,
                    "Dropping late tick"
                );
                continue;
            }

            if current.is_some_and(|idx| window.bar_index > idx) {
                if let Some(bar) = self.confirm(timeframe)? {
                    confirmed.push(bar);
                }
            }

            let bar = self.forming.entry(timeframe).or_insert_with(|| {
                Bar::new(
                    tick.symbol.clone(),
                    timeframe,
                    window.bar_index,
                    window.ts_start_ms,
                    window.ts_end_ms,
                )
            });
            bar.apply(tick)?;
        }

        self.observers.notify_all(&confirmed);
        Ok(confirmed)
    }

    /// Confirm every forming bar whose window ended at or before `now_ms`.
    pub fn close_elapsed(&mut self, now_ms: i64) -> Result<Vec<Bar>, EngineError> {
        let elapsed: Vec<Timeframe> = self
            .forming
            .iter()
            .filter(|(_, bar)| bar.ts_end_ms() <= now_ms)
            .map(|(tf, _)| *tf)
            .collect();

        let mut confirmed = Vec::with_capacity(elapsed.len());
        for timeframe in elapsed {
            if let Some(bar) = self.confirm(timeframe)? {
                confirmed.push(bar);
            }
        }
        self.observers.notify_all(&confirmed);
        Ok(confirmed)
    }

    /// Confirm every forming bar regardless of its window.
    pub fn force_confirm_all(&mut self) -> Result<Vec<Bar>, EngineError> {
        let timeframes: Vec<Timeframe> = self.forming.keys().copied().collect();
        let mut confirmed = Vec::with_capacity(timeframes.len());
        for timeframe in timeframes {
            if let Some(bar) = self.confirm(timeframe)? {
                confirmed.push(bar);
            }
        }
        if !confirmed.is_empty() {
            debug!(
                symbol = %self.symbol,
                bars = confirmed.len(),
                "Force-confirmed forming bars"
            );
        }
        self.observers.notify_all(&confirmed);
        Ok(confirmed)
    }

    fn confirm(&mut self, timeframe: Timeframe) -> Result<Option<Bar>, EngineError> {
        let Some(mut bar) = self.forming.remove(&timeframe) else {
            return Ok(None);
        };
        bar.confirm()?;
        self.last_confirmed.insert(timeframe, bar.bar_index());
        self.stats.bars_confirmed += 1;
        debug!(
            symbol = %bar.symbol(),
            timeframe = %timeframe,
            bar_index = bar.bar_index(),
            tick_count = bar.tick_count(),
            "Bar confirmed"
        );
        Ok(Some(bar))
    }

    /// Current forming bar for a timeframe.
    pub fn forming_bar(&self, timeframe: Timeframe) -> Option<&Bar> {
        self.forming.get(&timeframe)
    }

    /// All forming bars, shortest timeframe first.
    pub fn forming_bars(&self) -> impl Iterator<Item = &Bar> {
        self.forming.values()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }
}
