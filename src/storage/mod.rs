//! # Storage Layer
//!
//! The physical layer of the engine: byte-addressed stores with region
//! allocation, and the append-only transaction log.
//!
//! ## Components
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Store                                        │
//! │  - atomic file-size counter (header, 8 B)    │
//! │  - ReclaimedSpace (best fit, Mutex)          │
//! │  - Box<dyn StoreDriver>                      │
//! └──────────────┬───────────────────────────────┘
//!                │
//!     ┌──────────┼───────────┐
//!     ▼          ▼           ▼
//! FileDriver  MmapDriver  MemoryDriver
//!
//! TransactionLog: wal/<index>.wal, rotated at 20 MiB
//! ```
//!
//! ## Module Organization
//!
//! - [`reclaim`]: best-fit reclaimed-space set
//! - [`driver`]: physical backends
//! - [`store`]: allocation, raw read/write, commit and close
//! - [`journal`]: write-ahead transaction log

pub mod driver;
pub mod journal;
pub mod reclaim;
pub mod store;

pub use driver::{FileDriver, MemoryDriver, MmapDriver, StoreDriver};
pub use journal::{read_all_entries, JournalEntry, JournalEntryKind, TransactionLog};
pub use reclaim::ReclaimedSpace;
pub use store::{Store, StoreKind};
