//! Bar Verifier
//!
//! Canonical export and parity checking for confirmed bar sets. This is the
//! acceptance gate for replays and reimplementations: two runs agree when
//! their exports hash the same, and a parity report says where they do not.
//!
//! # Architecture
//!
//! ```text
//!   computed bars ──┐                 ┌── ReferenceSource
//!                   ▼                 ▼   (bars / CSV bytes / CSV file)
//!          ┌─────────────────┐  ┌──────────────────┐
//!          │CanonicalExporter│◄─│ParityComparator  │
//!          │ sort → CSV → SHA│  │ align by BarKey  │
//!          └─────────────────┘  └────────┬─────────┘
//!                                        ▼
//!                                   ParityReport
//! ```

pub mod error;
pub mod export;
pub mod parity;

pub use error::VerifierError;
pub use export::{CanonicalExporter, CSV_COLUMNS};
pub use parity::{
    first_hash_divergence, BarField, CsvBytes, CsvFile, FieldMismatch, HashDivergence,
    ParityComparator, ParityReport, ReferenceSource,
};
