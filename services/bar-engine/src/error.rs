//! Bar engine errors
//!
//! All of these are invariant violations. Late or out-of-session ticks are
//! counted in `EngineStats`, not raised.

use thiserror::Error;
use types::errors::BarError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Bar(#[from] BarError),

    #[error("tick for {tick_symbol} routed to engine for {engine_symbol}")]
    SymbolMismatch {
        engine_symbol: String,
        tick_symbol: String,
    },

    #[error("partition worker for {symbol} has stopped")]
    WorkerStopped { symbol: String },

    #[error("partition worker for {symbol} failed: {reason}")]
    WorkerFailed { symbol: String, reason: String },
}
