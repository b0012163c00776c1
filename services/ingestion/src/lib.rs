//! Tick Ingestion Service
//!
//! First stage of the aggregation pipeline. Accepts vendor ticks of any
//! quality and hands a clean, ordered, deduplicated stream of canonical
//! ticks to the bar engine.
//!
//! # Architecture
//!
//! ```text
//!  RawTick (any vendor)
//!        │
//!   ┌────▼─────┐
//!   │Validate  │  ← malformed records counted and dropped
//!   └────┬─────┘
//!   ┌────▼─────┐
//!   │Canonical │  ← SourceRegistry maps vendor tag, symbol upper-cased
//!   └────┬─────┘
//!   ┌────▼─────┐
//!   │Dedup     │  ← FIFO window of tick hashes
//!   └────┬─────┘
//!   ┌────▼─────┐
//!   │Ordering  │  ← per-symbol last-seen ts_ms (togglable)
//!   └────┬─────┘
//!        │
//!   observers (callbacks / channels)
//! ```

pub mod normalizer;
pub mod sources;

pub use normalizer::{
    MalformedReason, NormalizeOutcome, NormalizerConfig, NormalizerStats, TickNormalizer,
};
pub use sources::{RegistryError, SourceRegistry};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
