//! Store errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use types::bar::{BarKey, BarState};
use types::errors::BarError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Journal {path} corrupt at byte offset {offset}: {detail}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        detail: String,
    },

    #[error("Conflicting save for bar {key}: stored hash {stored_hash}, new hash {new_hash}")]
    Conflict {
        key: BarKey,
        stored_hash: String,
        new_hash: String,
    },

    #[error("Cannot store bar {key} in state {state}; only confirmed bars are persisted")]
    NotConfirmed { key: BarKey, state: BarState },

    #[error("Bar state error: {0}")]
    Bar(#[from] BarError),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}
