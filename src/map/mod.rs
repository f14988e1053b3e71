//! # Persistent Maps
//!
//! The key/value layer built on top of a [`crate::storage::Store`]:
//!
//! - [`lock`]: `ShardedLock`, ten shard locks under one global lock
//! - [`disk_map`]: `DiskMap`, the disk-resident hash map with per-key guards
//! - [`data_file`]: `DataFile`, a store plus its catalog of named maps

pub mod data_file;
pub mod disk_map;
pub mod lock;

pub use data_file::DataFile;
pub use disk_map::{DiskMap, KeyGuard, Replaced};
pub use lock::{LockStats, ShardedLock};
