//! Bar Persistence Service
//!
//! Durable and fast-path storage for confirmed bars behind one consistency
//! contract: a bar read from the cache hashes exactly like the same bar read
//! from the repository.
//!
//! # Architecture
//!
//! ```text
//!        save / get / get_range
//!               │
//!        ┌──────▼───────┐
//!        │TieredBarStore│
//!        └──┬────────┬──┘
//!   ┌───────▼──┐  ┌──▼──────────────────────┐
//!   │BarCache  │  │dyn BarRepository        │
//!   │(LRU)     │  │ ├ MemoryBarRepository   │
//!   └──────────┘  │ └ JournalBarRepository  │  ← CRC32C append-only file
//!                 └─────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod journal;
pub mod repository;
pub mod store;

pub use cache::{BarCache, CacheStats};
pub use error::StoreError;
pub use journal::{FsyncPolicy, JournalBarRepository, JournalConfig};
pub use repository::{BarRepository, MemoryBarRepository};
pub use store::{open_store, SaveOutcome, StoreStats, TieredBarStore};
