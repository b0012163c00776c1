//! Bar entity and lifecycle
//!
//! A bar aggregates the ticks of one symbol over one timeframe window.
//! Lifecycle only moves forward:
//!
//! ```text
//! FORMING ──confirm()──▶ CONFIRMED ──to_historical()──▶ HISTORICAL
//! ```
//!
//! Only a FORMING bar accepts ticks. `bar_index` and the window bounds are
//! fixed at creation. The canonical projection (and therefore `hash()`)
//! covers content only, so moving a bar to HISTORICAL never changes it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::BarError;
use crate::hashing::{fold_negative_zero, sha256_hex};
use crate::tick::CanonicalTick;
use crate::timeframe::Timeframe;

/// Lifecycle state of a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BarState {
    /// Still accepting ticks; owned by the bar engine.
    Forming,
    /// Closed and immutable.
    Confirmed,
    /// Confirmed and safe for bulk eviction/archival.
    Historical,
}

impl BarState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarState::Forming => "FORMING",
            BarState::Confirmed => "CONFIRMED",
            BarState::Historical => "HISTORICAL",
        }
    }
}

impl fmt::Display for BarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a bar: `(symbol, timeframe, bar_index)`.
///
/// Derived `Ord` sorts by symbol, then timeframe, then index, which is the
/// canonical export order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar_index: i64,
}

impl BarKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, bar_index: i64) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bar_index,
        }
    }
}

impl fmt::Display for BarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.symbol, self.timeframe, self.bar_index)
    }
}

/// Canonical projection of a bar, used only for hashing and export.
///
/// Field declaration order is lexical, so the JSON serialization has its
/// keys in a fixed alphabetical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalBar {
    pub bar_index: i64,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub open: Option<f64>,
    pub symbol: String,
    pub tick_count: u64,
    pub timeframe: Timeframe,
    pub ts_end_ms: i64,
    pub ts_start_ms: i64,
    pub volume: f64,
}

impl CanonicalBar {
    /// Serialized form the bar hash is computed over.
    ///
    /// Zeros are written unsigned, matching the canonical CSV export.
    pub fn to_canonical_json(&self) -> String {
        let fold = |v: Option<f64>| v.map(fold_negative_zero);
        let folded = CanonicalBar {
            close: fold(self.close),
            high: fold(self.high),
            low: fold(self.low),
            open: fold(self.open),
            volume: fold_negative_zero(self.volume),
            ..self.clone()
        };
        // Projection holds only plain numbers and strings; serde_json cannot
        // fail on it. Non-finite floats serialize as null.
        serde_json::to_string(&folded).unwrap_or_default()
    }

    pub fn hash(&self) -> String {
        sha256_hex(self.to_canonical_json().as_bytes())
    }
}

/// An OHLCV aggregate for one symbol/timeframe window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    symbol: String,
    timeframe: Timeframe,
    bar_index: i64,
    ts_start_ms: i64,
    ts_end_ms: i64,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: f64,
    tick_count: u64,
    state: BarState,
}

impl Bar {
    /// Create an empty FORMING bar for the window `[ts_start_ms, ts_end_ms)`.
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bar_index: i64,
        ts_start_ms: i64,
        ts_end_ms: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bar_index,
            ts_start_ms,
            ts_end_ms,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: 0.0,
            tick_count: 0,
            state: BarState::Forming,
        }
    }

    /// Rebuild a bar from stored field values (repository reads, CSV import).
    ///
    /// The result hashes identically to an engine-built bar with the same
    /// values.
    pub fn from_parts(parts: CanonicalBar, state: BarState) -> Self {
        Self {
            symbol: parts.symbol,
            timeframe: parts.timeframe,
            bar_index: parts.bar_index,
            ts_start_ms: parts.ts_start_ms,
            ts_end_ms: parts.ts_end_ms,
            open: parts.open,
            high: parts.high,
            low: parts.low,
            close: parts.close,
            volume: parts.volume,
            tick_count: parts.tick_count,
            state,
        }
    }

    /// Apply one tick. Requires FORMING.
    pub fn apply(&mut self, tick: &CanonicalTick) -> Result<(), BarError> {
        if self.state != BarState::Forming {
            return Err(BarError::NotForming {
                key: self.key(),
                state: self.state,
            });
        }
        if tick.symbol != self.symbol {
            return Err(BarError::SymbolMismatch {
                key: self.key(),
                tick_symbol: tick.symbol.clone(),
            });
        }

        let price = tick.price;
        match self.open {
            None => {
                self.open = Some(price);
                self.high = Some(price);
                self.low = Some(price);
                self.close = Some(price);
                self.volume = tick.size;
                self.tick_count = 1;
            }
            Some(_) => {
                self.high = self.high.map(|h| h.max(price));
                self.low = self.low.map(|l| l.min(price));
                self.close = Some(price);
                self.volume += tick.size;
                self.tick_count += 1;
            }
        }
        Ok(())
    }

    /// FORMING → CONFIRMED.
    pub fn confirm(&mut self) -> Result<(), BarError> {
        self.transition(BarState::Forming, BarState::Confirmed)
    }

    /// CONFIRMED → HISTORICAL.
    pub fn to_historical(&mut self) -> Result<(), BarError> {
        self.transition(BarState::Confirmed, BarState::Historical)
    }

    fn transition(&mut self, required: BarState, to: BarState) -> Result<(), BarError> {
        if self.state != required {
            return Err(BarError::InvalidTransition {
                key: self.key(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Field set in fixed lexical key order. Hashing/export only.
    pub fn canonical_projection(&self) -> CanonicalBar {
        CanonicalBar {
            bar_index: self.bar_index,
            close: self.close,
            high: self.high,
            low: self.low,
            open: self.open,
            symbol: self.symbol.clone(),
            tick_count: self.tick_count,
            timeframe: self.timeframe,
            ts_end_ms: self.ts_end_ms,
            ts_start_ms: self.ts_start_ms,
            volume: self.volume,
        }
    }

    /// Hex SHA-256 over the canonical projection.
    pub fn hash(&self) -> String {
        self.canonical_projection().hash()
    }

    pub fn key(&self) -> BarKey {
        BarKey::new(self.symbol.clone(), self.timeframe, self.bar_index)
    }

    /// True when `ts_ms` falls inside `[ts_start_ms, ts_end_ms)`.
    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.ts_start_ms && ts_ms < self.ts_end_ms
    }

    /// No ticks observed in this window.
    pub fn is_empty(&self) -> bool {
        self.tick_count == 0
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bar_index(&self) -> i64 {
        self.bar_index
    }

    pub fn ts_start_ms(&self) -> i64 {
        self.ts_start_ms
    }

    pub fn ts_end_ms(&self) -> i64 {
        self.ts_end_ms
    }

    pub fn open(&self) -> Option<f64> {
        self.open
    }

    pub fn high(&self) -> Option<f64> {
        self.high
    }

    pub fn low(&self) -> Option<f64> {
        self.low
    }

    pub fn close(&self) -> Option<f64> {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn state(&self) -> BarState {
        self.state
    }

    /// Validate OHLC integrity for a non-empty bar.
    pub fn is_valid(&self) -> bool {
        match (self.open, self.high, self.low, self.close) {
            (Some(o), Some(h), Some(l), Some(c)) => {
                h >= o && h >= c && h >= l && l <= o && l <= c && self.volume >= 0.0
            }
            (None, None, None, None) => self.tick_count == 0,
            _ => false,
        }
    }
}
