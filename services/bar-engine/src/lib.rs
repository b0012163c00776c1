//! Bar Engine Service
//!
//! Consumes canonical ticks and produces confirmed OHLCV bars across
//! several timeframes at once. Bar windows and indices come from the
//! session calendar; a bar is confirmed when the first tick of a later
//! window arrives, when the clock passes its end (`close_elapsed`), or on
//! `force_confirm_all`.
//!
//! # Architecture
//!
//! ```text
//!   CanonicalTick
//!        │
//! ┌──────▼───────────────┐
//! │MultiSymbolBarEngine  │  ← routes by symbol, lazily creates engines
//! └──────┬───────────────┘
//!   ┌────┴─────┬─────────┐
//! ┌─▼──┐    ┌──▼─┐     ┌─▼──┐
//! │AAPL│    │MSFT│ ... │TSLA│  ← BarEngine: one FORMING bar per timeframe
//! └─┬──┘    └──┬─┘     └─┬──┘
//!   └──────────┼─────────┘
//!        confirmed bars → observers / channels
//! ```
//!
//! `PartitionedBarEngine` runs the same per-symbol engines as tokio tasks.

pub mod engine;
pub mod error;
pub mod multi;
pub mod partitioned;

pub use engine::{BarEngine, EngineConfig, EngineStats};
pub use error::EngineError;
pub use multi::MultiSymbolBarEngine;
pub use partitioned::PartitionedBarEngine;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
