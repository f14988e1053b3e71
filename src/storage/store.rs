//! # Store
//!
//! A `Store` is one physical file (or in-memory buffer) addressed by byte
//! position. It hands out regions through `allocate`, takes them back through
//! `deallocate` and moves raw bytes in and out of them. Everything above it
//! (persistent maps, records, indexes) only sees positions.
//!
//! ## File Layout
//!
//! ```text
//! 0          8
//! +----------+--------------------------------------------------+
//! | size u64 | allocated regions ...                            |
//! +----------+--------------------------------------------------+
//!   little-endian file-size counter (next append position)
//! ```
//!
//! ## Allocation
//!
//! 1. Best fit from the reclaimed-space set (guarded by its own mutex)
//! 2. Otherwise append: `fetch_add` on the atomic size counter reserves
//!    `[old, old + size)`, so concurrent growers never collide
//! 3. The driver is asked for capacity up to the new end, then the counter
//!    is persisted at position 0
//!
//! A failed growth propagates. Reclaimed space is not persisted; a reopened
//! store starts with an empty reclaimed set.
//!
//! ## Reads
//!
//! Reads that reach past the tracked size return `None` without touching the
//! driver. A driver failure while reading one region is logged and also
//! reported as `None`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::driver::{FileDriver, MemoryDriver, MmapDriver, StoreDriver};
use super::reclaim::ReclaimedSpace;
use crate::config::STORE_HEADER_SIZE;

/// Physical backend used for data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// Positional read/write on a regular file.
    #[default]
    File,
    /// Memory-mapped file.
    Mmap,
    /// Heap buffer, lost when the store is dropped.
    Memory,
}

#[derive(Debug)]
pub struct Store {
    driver: Box<dyn StoreDriver>,
    name: String,
    file_size: AtomicU64,
    reclaimed: Mutex<ReclaimedSpace>,
    header_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Store {
    /// Opens (creating if needed) a store of the given kind. `path` is ignored
    /// for memory stores other than as a display name.
    pub fn open(kind: StoreKind, path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let driver: Box<dyn StoreDriver> = match kind {
            StoreKind::File => Box::new(FileDriver::open(path)?),
            StoreKind::Mmap => Box::new(MmapDriver::open(path)?),
            StoreKind::Memory => Box::new(MemoryDriver::new()),
        };
        Self::from_driver(driver, name)
    }

    pub fn in_memory(name: &str) -> Result<Self> {
        Self::from_driver(Box::new(MemoryDriver::new()), name.to_string())
    }

    pub fn from_driver(driver: Box<dyn StoreDriver>, name: String) -> Result<Self> {
        driver.ensure_capacity(STORE_HEADER_SIZE)?;

        let physical = driver.physical_len()?;
        let size = if physical >= STORE_HEADER_SIZE {
            let mut header = [0u8; STORE_HEADER_SIZE as usize];
            driver
                .read_at(&mut header, 0)
                .wrap_err_with(|| format!("failed to read size header of '{}'", name))?;
            u64::from_le_bytes(header).max(STORE_HEADER_SIZE)
        } else {
            STORE_HEADER_SIZE
        };

        let store = Self {
            driver,
            name,
            file_size: AtomicU64::new(size),
            reclaimed: Mutex::new(ReclaimedSpace::new()),
            header_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        };
        store.persist_header()?;

        info!(store = %store.name, size, "opened store");
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.driver.path()
    }

    /// Tracked size: the position the next append would start at.
    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reclaimed regions as `(position, size)`, in position order.
    pub fn reclaimed_regions(&self) -> Vec<(u64, u64)> {
        self.reclaimed.lock().regions().collect()
    }

    pub fn reclaimed_bytes(&self) -> u64 {
        self.reclaimed.lock().total_bytes()
    }

    fn persist_header(&self) -> Result<()> {
        let _guard = self.header_lock.lock();
        let size = self.file_size.load(Ordering::Acquire);
        self.driver
            .write_at(&size.to_le_bytes(), 0)
            .wrap_err_with(|| format!("failed to persist size header of '{}'", self.name))
    }

    /// Reserves `size` bytes and returns their position.
    pub fn allocate(&self, size: u64) -> Result<u64> {
        ensure!(size > 0, "cannot allocate an empty region in '{}'", self.name);
        ensure!(!self.is_closed(), "store '{}' is closed", self.name);

        if let Some(position) = self.reclaimed.lock().take_best_fit(size) {
            return Ok(position);
        }

        let position = self.file_size.fetch_add(size, Ordering::AcqRel);
        let end = position + size;

        self.driver
            .ensure_capacity(end)
            .wrap_err_with(|| format!("failed to grow '{}' to {} bytes", self.name, end))?;
        self.persist_header()?;

        Ok(position)
    }

    /// Returns a region to the reclaimed set.
    pub fn deallocate(&self, position: u64, size: u64) -> Result<()> {
        ensure!(
            position >= STORE_HEADER_SIZE
                && position.checked_add(size).is_some_and(|end| end <= self.file_size()),
            "cannot reclaim ({}, {}) outside of '{}' (size {})",
            position,
            size,
            self.name,
            self.file_size()
        );
        self.reclaimed.lock().insert(position, size)
    }

    pub fn write(&self, bytes: &[u8], position: u64) -> Result<usize> {
        ensure!(
            position >= STORE_HEADER_SIZE,
            "write at {} would clobber the size header of '{}'",
            position,
            self.name
        );
        ensure!(
            position
                .checked_add(bytes.len() as u64)
                .is_some_and(|end| end <= self.file_size()),
            "write of {} bytes at {} past end of '{}' (size {})",
            bytes.len(),
            position,
            self.name,
            self.file_size()
        );

        self.driver.write_at(bytes, position)?;
        Ok(bytes.len())
    }

    pub fn read(&self, position: u64, size: usize) -> Option<Vec<u8>> {
        let end = position.checked_add(size as u64)?;
        if end > self.file_size() {
            return None;
        }

        let mut buf = vec![0u8; size];
        match self.driver.read_at(&mut buf, position) {
            Ok(()) => Some(buf),
            Err(err) => {
                warn!(store = %self.name, position, size, error = %err, "read failed");
                None
            }
        }
    }

    /// Forces written data and the size header to durable storage.
    pub fn commit(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.persist_header()?;
        self.driver.sync()
    }

    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.persist_header()?;
        self.driver.sync()?;
        debug!(store = %self.name, size = self.file_size(), "closed store");
        Ok(())
    }

    /// Closes the store and removes its backing file.
    pub fn delete(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.reclaimed.lock().clear();
        self.driver.remove()?;
        info!(store = %self.name, "deleted store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn file_store(dir: &Path, kind: StoreKind) -> Store {
        Store::open(kind, &dir.join("test.dat")).unwrap()
    }

    #[test]
    fn fresh_store_starts_after_header() {
        let store = Store::in_memory("mem").unwrap();
        assert_eq!(store.file_size(), STORE_HEADER_SIZE);
        assert_eq!(store.allocate(16).unwrap(), STORE_HEADER_SIZE);
        assert_eq!(store.file_size(), STORE_HEADER_SIZE + 16);
    }

    #[test]
    fn write_then_read_returns_bytes() {
        let dir = tempdir().unwrap();
        for kind in [StoreKind::File, StoreKind::Mmap, StoreKind::Memory] {
            let store = Store::open(kind, &dir.path().join(format!("{:?}.dat", kind))).unwrap();
            let pos = store.allocate(5).unwrap();
            assert_eq!(store.write(b"abcde", pos).unwrap(), 5);
            assert_eq!(store.read(pos, 5).unwrap(), b"abcde");
        }
    }

    #[test]
    fn read_beyond_size_returns_none() {
        let store = Store::in_memory("mem").unwrap();
        let pos = store.allocate(4).unwrap();
        assert!(store.read(pos, 5).is_none());
        assert!(store.read(10_000, 1).is_none());
    }

    #[test]
    fn positions_near_u64_max_do_not_overflow() {
        let store = Store::in_memory("mem").unwrap();
        store.allocate(8).unwrap();
        assert!(store.read(u64::MAX - 2, 8).is_none());
        assert!(store.write(b"abcdefgh", u64::MAX - 2).is_err());
        assert!(store.deallocate(u64::MAX - 2, 8).is_err());
    }

    #[test]
    fn write_past_end_is_rejected() {
        let store = Store::in_memory("mem").unwrap();
        let pos = store.allocate(4).unwrap();
        assert!(store.write(b"12345", pos).is_err());
        assert!(store.write(b"1", 0).is_err());
    }

    #[test]
    fn deallocated_region_is_reused() {
        let store = Store::in_memory("mem").unwrap();
        let a = store.allocate(64).unwrap();
        let _b = store.allocate(64).unwrap();
        store.deallocate(a, 64).unwrap();

        let size_before = store.file_size();
        assert_eq!(store.allocate(60).unwrap(), a);
        assert_eq!(store.file_size(), size_before);
    }

    #[test]
    fn double_deallocate_is_rejected() {
        let store = Store::in_memory("mem").unwrap();
        let a = store.allocate(32).unwrap();
        store.deallocate(a, 32).unwrap();
        assert!(store.deallocate(a, 32).is_err());
    }

    #[test]
    fn size_header_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.dat");

        let pos = {
            let store = Store::open(StoreKind::File, &path).unwrap();
            let pos = store.allocate(11).unwrap();
            store.write(b"hello world", pos).unwrap();
            store.close().unwrap();
            pos
        };

        let store = Store::open(StoreKind::File, &path).unwrap();
        assert_eq!(store.file_size(), STORE_HEADER_SIZE + 11);
        assert_eq!(store.read(pos, 11).unwrap(), b"hello world");
        assert!(store.reclaimed_regions().is_empty());
    }

    #[test]
    fn mmap_store_grows_past_initial_mapping() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path(), StoreKind::Mmap);
        let big = crate::config::MMAP_INITIAL_SIZE;
        let pos = store.allocate(big).unwrap();
        store.write(b"end", pos + big - 3).unwrap();
        assert_eq!(store.read(pos + big - 3, 3).unwrap(), b"end");
    }

    #[test]
    fn delete_removes_backing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doomed.dat");
        let store = Store::open(StoreKind::File, &path).unwrap();
        store.delete().unwrap();
        assert!(!path.exists());
        assert!(store.allocate(1).is_err());
    }

    #[test]
    fn concurrent_allocations_never_overlap() {
        let store = Arc::new(Store::in_memory("mem").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut regions = Vec::new();
                    for i in 0..200u64 {
                        let size = 8 + (t * 7 + i) % 40;
                        let pos = store.allocate(size).unwrap();
                        regions.push((pos, size));
                        if i % 3 == 0 {
                            let (p, s) = regions.remove(0);
                            store.deallocate(p, s).unwrap();
                        }
                    }
                    regions
                })
            })
            .collect();

        let mut live: Vec<(u64, u64)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        live.extend(store.reclaimed_regions());
        live.sort();

        for pair in live.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlap {:?}", pair);
        }
        let total: u64 = live.iter().map(|(_, s)| s).sum();
        assert!(total + STORE_HEADER_SIZE <= store.file_size());
    }
}
