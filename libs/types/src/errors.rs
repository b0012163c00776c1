//! Error types shared across the aggregation core
//!
//! Invariant violations only. Expected conditions (duplicates, out-of-order
//! ticks, parity mismatches) are reported as values, never as errors.

use thiserror::Error;

use crate::bar::{BarKey, BarState};

/// Bar lifecycle violations.
///
/// Any of these means a broken invariant elsewhere in the pipeline; callers
/// surface them immediately instead of retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BarError {
    #[error("cannot apply tick to bar {key}: state is {state}, expected FORMING")]
    NotForming { key: BarKey, state: BarState },

    #[error("invalid state transition for bar {key}: {from} -> {to}")]
    InvalidTransition {
        key: BarKey,
        from: BarState,
        to: BarState,
    },

    #[error("tick for {tick_symbol} applied to bar {key}")]
    SymbolMismatch { key: BarKey, tick_symbol: String },
}

/// Configuration errors, raised while loading or validating `CoreConfig`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("invalid session time {value}: {reason}")]
    InvalidSessionTime { value: String, reason: String },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
