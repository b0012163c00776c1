//! Deterministic Replay Service
//!
//! Replays recorded ticks against a virtual clock and reproduces incidents.
//! Replay speed changes pacing only: the same source through the same
//! configuration yields the same confirmed bars and hashes at any speed.
//!
//! # Architecture
//!
//! ```text
//!   TickSource ──► TickReplayer ──► on_tick / on_batch ──► DeterministicPipeline
//!   (memory/CSV)        ▲                                   Normalizer
//!                       │ ReplayHandle                        → MultiSymbolBarEngine
//!                 VirtualClock (pause / speed)                → TieredBarStore (opt.)
//!                                                                   │
//!                                         IncidentBundle ◄── bars + export hash
//! ```

pub mod clock;
pub mod error;
pub mod incident;
pub mod pipeline;
pub mod replayer;
pub mod source;

pub use clock::{AnyClock, Clock, LiveClock, VirtualClock};
pub use error::{ReplayError, SourceError};
pub use incident::{IncidentBundle, Reproduction};
pub use pipeline::{DeterministicPipeline, PipelineOutput};
pub use replayer::{ReplayHandle, ReplayStats, RunState, TickReplayer};
pub use source::{CsvTickSource, MemoryTickSource, TickSource};
