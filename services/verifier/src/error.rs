//! Verifier errors

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed canonical record at line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    #[error("Invalid parity tolerance {0}: must be finite and >= 0")]
    InvalidTolerance(f64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
