//! Types library for deterministic tick-to-bar aggregation
//!
//! Shared definitions for every stage of the pipeline: raw and canonical
//! ticks, timeframes, the bar entity and its lifecycle, the session calendar
//! that assigns bar indices, configuration, and the hashing helpers used for
//! parity checks.
//!
//! # Modules
//! - `tick`: Raw and canonical tick records, source tags
//! - `timeframe`: Supported bar timeframes
//! - `bar`: Bar entity, state machine, canonical projection and hash
//! - `calendar`: Session calendar (timestamp → bar window)
//! - `config`: Explicit configuration surface for the core
//! - `hashing`: SHA-256 helpers
//! - `observer`: Fan-out lists for callbacks and channel subscribers
//! - `errors`: Error taxonomy

pub mod bar;
pub mod calendar;
pub mod config;
pub mod errors;
pub mod hashing;
pub mod observer;
pub mod tick;
pub mod timeframe;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bar::*;
    pub use crate::calendar::*;
    pub use crate::config::*;
    pub use crate::errors::*;
    pub use crate::tick::*;
    pub use crate::timeframe::*;
}
