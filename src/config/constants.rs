//! # Quarry Configuration Constants
//!
//! This module centralizes the numeric and naming constants of the engine,
//! grouping interdependent values together. Values that constrain each other
//! are checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! STORE_HEADER_SIZE (8 bytes, file-size counter)
//!       │
//!       └─> CATALOG_MAP_POSITION (first region after the header)
//!             The catalog map header is the first allocation of every
//!             data file, so its position is known without a lookup.
//!
//! MAP_HEADER_SIZE (24 bytes)
//!       │
//!       └─> MMAP_INITIAL_SIZE (must hold header + catalog map header)
//!
//! LOCK_SHARD_COUNT (10)
//!       │
//!       └─> DEFAULT_BUCKET_COUNT (64, shard = bucket % LOCK_SHARD_COUNT)
//!             MAX_BUCKET_LOAD triggers directory doubling
//!
//! JOURNAL_MAX_FILE_SIZE (20 MiB)
//!       │
//!       └─> JOURNAL_ENTRY_HEADER_SIZE (24 bytes per entry)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `DEFAULT_BUCKET_COUNT` is a power of two (directory doubling keeps it so)
//! 2. `MMAP_INITIAL_SIZE >= CATALOG_MAP_POSITION + MAP_HEADER_SIZE`
//! 3. `RECLAIM_MIN_REMAINDER > 0` (a zero-sized reclaimed entry is never kept)

use std::time::Duration;

// ============================================================================
// STORE LAYOUT
// Every store begins with an 8-byte little-endian file-size counter
// ============================================================================

/// Size of the file-size counter at position 0 of every store.
pub const STORE_HEADER_SIZE: u64 = 8;

/// A reclaimed region is split only when more than this many bytes remain
/// after carving out the requested size. Smaller leftovers are wasted.
pub const RECLAIM_MIN_REMAINDER: u64 = 20;

/// Initial mapping length for memory-mapped stores. The mapping doubles
/// whenever an allocation reaches past it.
pub const MMAP_INITIAL_SIZE: u64 = 1024 * 1024;

const _: () = assert!(RECLAIM_MIN_REMAINDER > 0, "RECLAIM_MIN_REMAINDER must be positive");

// ============================================================================
// PERSISTENT MAP LAYOUT
// ============================================================================

/// Number of independently lockable shards per persistent map.
pub const LOCK_SHARD_COUNT: usize = 10;

/// Initial directory size of a freshly created persistent map.
pub const DEFAULT_BUCKET_COUNT: u64 = 64;

/// Average entries per bucket above which the directory doubles.
pub const MAX_BUCKET_LOAD: u64 = 4;

/// Size of the on-disk map header (directory, bucket count, entry count).
pub const MAP_HEADER_SIZE: u64 = 24;

/// Size of the on-disk chain node header (next, hash, key length, value length).
pub const NODE_HEADER_SIZE: u64 = 24;

/// Position of the catalog map header in every data file.
pub const CATALOG_MAP_POSITION: u64 = STORE_HEADER_SIZE;

const _: () = assert!(
    DEFAULT_BUCKET_COUNT.is_power_of_two(),
    "DEFAULT_BUCKET_COUNT must be a power of two"
);

const _: () = assert!(LOCK_SHARD_COUNT > 0, "LOCK_SHARD_COUNT must be positive");

const _: () = assert!(
    MMAP_INITIAL_SIZE >= CATALOG_MAP_POSITION + MAP_HEADER_SIZE,
    "MMAP_INITIAL_SIZE must hold the store header and catalog map header"
);

// ============================================================================
// RESERVED MAP NAMES
// ============================================================================

/// Serializer name -> code registry map, present in every data file.
pub const SERIALIZER_NAME_MAP: &str = "__serializers__name__";

/// Serializer code -> name registry map, present in every data file.
pub const SERIALIZER_ID_MAP: &str = "__serializers__id__";

/// Partition value -> partition entry map in the system file.
pub const PARTITION_MAP: &str = "__partitions__";

/// Partition counter map in the system file.
pub const PARTITION_COUNTER_MAP: &str = "__partition_counter__";

/// Entity type -> recorded indexed attributes map in the system file.
pub const INDEX_REGISTRY_MAP: &str = "__index_registry__";

// ============================================================================
// FILE NAMING
// ============================================================================

/// File name (without extension) of the system data file.
pub const SYSTEM_FILE_NAME: &str = "system";

/// Extension of data files.
pub const DATA_FILE_EXTENSION: &str = "dat";

/// Journal subdirectory below the database location.
pub const JOURNAL_DIR: &str = "wal";

/// Extension of journal files (`<index>.wal`).
pub const JOURNAL_EXTENSION: &str = "wal";

/// Separator between a relationship name and a target attribute in
/// criteria attribute paths (`child.field`).
pub const RELATIONSHIP_SEPARATOR: char = '.';

// ============================================================================
// JOURNAL CONFIGURATION
// ============================================================================

/// Active journal file rotates once it grows past this size (20 MiB).
pub const JOURNAL_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Size of each journal entry header.
pub const JOURNAL_ENTRY_HEADER_SIZE: usize = 24;

// ============================================================================
// BACKGROUND FLUSH
// ============================================================================

/// Interval between background commits of every open data file.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
