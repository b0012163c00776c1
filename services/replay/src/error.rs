//! Replay errors

use std::io;

use bar_engine::EngineError;
use persistence::StoreError;
use thiserror::Error;
use types::errors::ConfigError;
use verifier::VerifierError;

/// Failure reading ticks from a source. Never reported as "no ticks".
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed tick at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Replay requires a virtual clock")]
    LiveClock,

    #[error("Invalid speed multiplier {0}: must be finite and > 0")]
    InvalidSpeed(f64),

    #[error("Invalid batch size: must be > 0")]
    InvalidBatchSize,

    #[error("No tick source set")]
    NoSource,

    #[error("Replay already running")]
    AlreadyRunning,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Verifier(#[from] VerifierError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
