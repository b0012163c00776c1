//! Tick normalizer
//!
//! Turns untrusted `RawTick`s into `CanonicalTick`s:
//! 1. reject malformed records,
//! 2. map the vendor tag and upper-case the symbol,
//! 3. drop ticks whose hash is still in the dedup window,
//! 4. (optionally) drop ticks older than the last accepted tick of the same
//!    symbol.
//!
//! Accepted ticks are delivered to every registered observer, in acceptance
//! order, before `process` returns. Drops are counted and reported as
//! values; nothing here returns an error for bad input.
//!
//! The dedup window is a fixed-size FIFO of tick hashes. Once a hash is
//! evicted, an identical tick is accepted again. The window bounds memory;
//! it does not promise infinite-history dedup.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use types::calendar::MAX_TS_MS;
use types::config::CoreConfig;
use types::hashing::fold_negative_zero;
use types::observer::Observers;
use types::tick::{CanonicalTick, RawTick, TickHash};

use crate::sources::SourceRegistry;

/// Configuration for the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizerConfig {
    /// Number of recent tick hashes remembered (0 disables dedup).
    pub dedup_window: usize,
    /// Drop ticks with `ts_ms` below the symbol's last accepted `ts_ms`.
    pub enforce_ordering: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            dedup_window: 10_000,
            enforce_ordering: true,
        }
    }
}

impl From<&CoreConfig> for NormalizerConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            dedup_window: config.dedup_window,
            enforce_ordering: config.enforce_ordering,
        }
    }
}

/// Why a raw tick was rejected as malformed.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedReason {
    EmptySymbol,
    InvalidPrice(f64),
    InvalidSize(f64),
    NegativeTimestamp(i64),
    /// Too far in the future for any bar window to be computed.
    TimestampOutOfRange(i64),
}

/// Result of normalizing one raw tick.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    /// Accepted and delivered to observers.
    Accepted(CanonicalTick),
    /// Hash already present in the dedup window.
    Duplicate(TickHash),
    /// Older than the last accepted tick for this symbol.
    OutOfOrder {
        symbol: String,
        last_ts_ms: i64,
        ts_ms: i64,
    },
    Malformed(MalformedReason),
}

impl NormalizeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, NormalizeOutcome::Accepted(_))
    }

    /// The canonical tick, if accepted.
    pub fn accepted(self) -> Option<CanonicalTick> {
        match self {
            NormalizeOutcome::Accepted(tick) => Some(tick),
            _ => None,
        }
    }
}

/// Cumulative normalizer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerStats {
    pub received: u64,
    pub normalized: u64,
    pub duplicates_dropped: u64,
    pub out_of_order_dropped: u64,
    pub malformed_dropped: u64,
}

impl NormalizerStats {
    /// Every received tick is either normalized or dropped for one reason.
    pub fn is_balanced(&self) -> bool {
        self.received
            == self.normalized
                + self.duplicates_dropped
                + self.out_of_order_dropped
                + self.malformed_dropped
    }
}

pub struct TickNormalizer {
    config: NormalizerConfig,
    registry: SourceRegistry,
    /// FIFO of recently accepted hashes, oldest at the front.
    window: VecDeque<TickHash>,
    /// Membership index over `window`.
    seen: HashSet<TickHash>,
    /// Last accepted `ts_ms` per canonical symbol.
    last_ts: HashMap<String, i64>,
    observers: Observers<CanonicalTick>,
    stats: NormalizerStats,
}

impl TickNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        info!(
            dedup_window = config.dedup_window,
            enforce_ordering = config.enforce_ordering,
            "TickNormalizer initialized"
        );

        Self {
            window: VecDeque::with_capacity(config.dedup_window),
            seen: HashSet::with_capacity(config.dedup_window),
            config,
            registry: SourceRegistry::default(),
            last_ts: HashMap::new(),
            observers: Observers::new(),
            stats: NormalizerStats::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(NormalizerConfig::default())
    }

    /// Replace the vendor alias table.
    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a callback for accepted ticks.
    pub fn on_tick<F>(&mut self, callback: F)
    where
        F: FnMut(&CanonicalTick) + Send + 'static,
    {
        self.observers.register(callback);
    }

    /// Channel subscription for accepted ticks.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<CanonicalTick> {
        self.observers.subscribe()
    }

    /// Normalize one raw tick.
    pub fn process(&mut self, raw: &RawTick) -> NormalizeOutcome {
        self.stats.received += 1;

        if let Some(reason) = Self::validate(raw) {
            self.stats.malformed_dropped += 1;
            warn!(
                source = %raw.source,
                symbol = %raw.symbol,
                ts_ms = raw.ts_ms,
                reason = ?reason,
                "Dropping malformed tick"
            );
            return NormalizeOutcome::Malformed(reason);
        }

        let tick = CanonicalTick::new(
            self.registry.resolve(&raw.source),
            raw.symbol.trim().to_ascii_uppercase(),
            raw.ts_ms,
            raw.price,
            fold_negative_zero(raw.size),
        );
        let hash = tick.tick_hash();

        if self.is_duplicate(&hash) {
            self.stats.duplicates_dropped += 1;
            debug!(
                symbol = %tick.symbol,
                ts_ms = tick.ts_ms,
                tick_hash = %hash,
                "Dropping duplicate tick"
            );
            return NormalizeOutcome::Duplicate(hash);
        }

        if self.config.enforce_ordering {
            if let Some(&last_ts_ms) = self.last_ts.get(&tick.symbol) {
                if tick.ts_ms < last_ts_ms {
                    self.stats.out_of_order_dropped += 1;
                    debug!(
                        symbol = %tick.symbol,
                        last_ts_ms,
                        ts_ms = tick.ts_ms,
                        "Dropping out-of-order tick"
                    );
                    return NormalizeOutcome::OutOfOrder {
                        symbol: tick.symbol,
                        last_ts_ms,
                        ts_ms: tick.ts_ms,
                    };
                }
            }
        }

        self.record_hash(hash);
        self.last_ts
            .entry(tick.symbol.clone())
            .and_modify(|ts| *ts = (*ts).max(tick.ts_ms))
            .or_insert(tick.ts_ms);
        self.stats.normalized += 1;

        self.observers.notify(&tick);
        NormalizeOutcome::Accepted(tick)
    }

    /// Normalize a sequence, returning the accepted ticks in order.
    pub fn process_batch<'a, I>(&mut self, raws: I) -> Vec<CanonicalTick>
    where
        I: IntoIterator<Item = &'a RawTick>,
    {
        raws.into_iter()
            .filter_map(|raw| self.process(raw).accepted())
            .collect()
    }

    pub fn stats(&self) -> NormalizerStats {
        self.stats
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Last accepted timestamp for a canonical symbol.
    pub fn last_ts(&self, symbol: &str) -> Option<i64> {
        self.last_ts.get(symbol).copied()
    }

    /// Hashes currently held in the dedup window.
    pub fn dedup_len(&self) -> usize {
        self.window.len()
    }

    /// Forget dedup and ordering history. Counters and observers are kept.
    pub fn reset_history(&mut self) {
        self.window.clear();
        self.seen.clear();
        self.last_ts.clear();
    }

    fn validate(raw: &RawTick) -> Option<MalformedReason> {
        if raw.symbol.trim().is_empty() {
            return Some(MalformedReason::EmptySymbol);
        }
        if !raw.price.is_finite() || raw.price <= 0.0 {
            return Some(MalformedReason::InvalidPrice(raw.price));
        }
        if !raw.size.is_finite() || raw.size < 0.0 {
            return Some(MalformedReason::InvalidSize(raw.size));
        }
        if raw.ts_ms < 0 {
            return Some(MalformedReason::NegativeTimestamp(raw.ts_ms));
        }
        if raw.ts_ms > MAX_TS_MS {
            return Some(MalformedReason::TimestampOutOfRange(raw.ts_ms));
        }
        None
    }

    fn is_duplicate(&self, hash: &TickHash) -> bool {
        self.config.dedup_window > 0 && self.seen.contains(hash)
    }

    fn record_hash(&mut self, hash: TickHash) {
        if self.config.dedup_window == 0 {
            return;
        }
        if self.window.len() >= self.config.dedup_window {
            if let Some(evicted) = self.window.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.window.push_back(hash);
        self.seen.insert(hash);
    }
}
