//! # Store Drivers
//!
//! A `StoreDriver` is the physical backend underneath a [`super::Store`]: it
//! moves bytes to and from positions and knows how to make them durable. All
//! allocation bookkeeping (file-size counter, reclaimed space) lives in the
//! store, so the three drivers only differ in how bytes are held.
//!
//! ## Drivers
//!
//! | Driver         | Backing                      | Growth                          |
//! |----------------|------------------------------|---------------------------------|
//! | `FileDriver`   | positional file I/O          | implicit, writes extend the file|
//! | `MmapDriver`   | `memmap2::MmapRaw` over file | mapping doubles and is remapped |
//! | `MemoryDriver` | `Vec<u8>`                    | vector resized                  |
//!
//! ## Concurrency
//!
//! Drivers are `Send + Sync` and take `&self` everywhere. Callers only ever
//! write to regions they were handed by the allocator, so concurrent writes
//! never target the same bytes. The mmap driver guards its mapping with a
//! `parking_lot::RwLock`: reads and writes share it, a remap takes it
//! exclusively.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapRaw;
use parking_lot::RwLock;

use crate::config::MMAP_INITIAL_SIZE;

pub trait StoreDriver: Send + Sync + std::fmt::Debug {
    /// Fills `buf` with the bytes starting at `position`.
    fn read_at(&self, buf: &mut [u8], position: u64) -> Result<()>;

    /// Writes `bytes` at `position`.
    fn write_at(&self, bytes: &[u8], position: u64) -> Result<()>;

    /// Makes sure positions below `end` are addressable.
    fn ensure_capacity(&self, _end: u64) -> Result<()> {
        Ok(())
    }

    /// Flushes pending writes to durable storage.
    fn sync(&self) -> Result<()>;

    /// Physical length of the backing storage.
    fn physical_len(&self) -> Result<u64>;

    /// Removes the backing storage.
    fn remove(&self) -> Result<()>;

    fn path(&self) -> Option<&Path> {
        None
    }
}

fn open_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create directory '{}'", parent.display()))?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))
}

#[cfg(unix)]
fn file_read_at(file: &File, buf: &mut [u8], position: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, position)
}

#[cfg(unix)]
fn file_write_at(file: &File, bytes: &[u8], position: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(bytes, position)
}

#[cfg(windows)]
fn file_read_at(file: &File, mut buf: &mut [u8], mut position: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, position)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => {
                buf = &mut std::mem::take(&mut buf)[n..];
                position += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn file_write_at(file: &File, mut bytes: &[u8], mut position: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !bytes.is_empty() {
        let n = file.seek_write(bytes, position)?;
        bytes = &bytes[n..];
        position += n as u64;
    }
    Ok(())
}

/// Positional-I/O file driver. Reads and writes never move a shared cursor,
/// so no lock is needed around the file handle.
#[derive(Debug)]
pub struct FileDriver {
    file: File,
    path: PathBuf,
}

impl FileDriver {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_file(&path)?;
        Ok(Self { file, path })
    }
}

impl StoreDriver for FileDriver {
    fn read_at(&self, buf: &mut [u8], position: u64) -> Result<()> {
        file_read_at(&self.file, buf, position).wrap_err_with(|| {
            format!(
                "failed to read {} bytes at {} from '{}'",
                buf.len(),
                position,
                self.path.display()
            )
        })
    }

    fn write_at(&self, bytes: &[u8], position: u64) -> Result<()> {
        file_write_at(&self.file, bytes, position).wrap_err_with(|| {
            format!(
                "failed to write {} bytes at {} to '{}'",
                bytes.len(),
                position,
                self.path.display()
            )
        })
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_data()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }

    fn physical_len(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", self.path.display()))?
            .len())
    }

    fn remove(&self) -> Result<()> {
        std::fs::remove_file(&self.path)
            .wrap_err_with(|| format!("failed to delete '{}'", self.path.display()))
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Memory-mapped file driver.
#[derive(Debug)]
pub struct MmapDriver {
    file: File,
    path: PathBuf,
    map: RwLock<MmapRaw>,
}

impl MmapDriver {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_file(&path)?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();
        if len < MMAP_INITIAL_SIZE {
            file.set_len(MMAP_INITIAL_SIZE)
                .wrap_err_with(|| format!("failed to size '{}'", path.display()))?;
        }

        let map = MmapRaw::map_raw(&file)
            .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?;

        Ok(Self {
            file,
            path,
            map: RwLock::new(map),
        })
    }

    pub fn mapped_len(&self) -> usize {
        self.map.read().len()
    }
}

impl StoreDriver for MmapDriver {
    fn read_at(&self, buf: &mut [u8], position: u64) -> Result<()> {
        let map = self.map.read();
        let start = position as usize;
        ensure!(
            start + buf.len() <= map.len(),
            "read of {} bytes at {} beyond mapping of {} bytes",
            buf.len(),
            position,
            map.len()
        );

        // SAFETY: the range [start, start + buf.len()) was bounds-checked against
        // the live mapping above, and the read lock keeps the mapping from being
        // replaced while we copy out of it.
        unsafe {
            std::ptr::copy_nonoverlapping(map.as_ptr().add(start), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write_at(&self, bytes: &[u8], position: u64) -> Result<()> {
        let map = self.map.read();
        let start = position as usize;
        ensure!(
            start + bytes.len() <= map.len(),
            "write of {} bytes at {} beyond mapping of {} bytes",
            bytes.len(),
            position,
            map.len()
        );

        // SAFETY: bounds were checked above and the read lock pins the mapping.
        // Writers only target regions the allocator handed to them exclusively,
        // so no two threads write the same bytes concurrently.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), map.as_mut_ptr().add(start), bytes.len());
        }
        Ok(())
    }

    fn ensure_capacity(&self, end: u64) -> Result<()> {
        if end as usize <= self.map.read().len() {
            return Ok(());
        }

        let mut map = self.map.write();
        let mut new_len = map.len().max(MMAP_INITIAL_SIZE as usize) as u64;
        if end <= new_len {
            return Ok(());
        }
        while new_len < end {
            new_len *= 2;
        }

        map.flush().wrap_err("failed to flush mapping before growth")?;
        self.file
            .set_len(new_len)
            .wrap_err_with(|| format!("failed to extend '{}' to {} bytes", self.path.display(), new_len))?;
        *map = MmapRaw::map_raw(&self.file)
            .wrap_err_with(|| format!("failed to remap '{}'", self.path.display()))?;

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.map
            .read()
            .flush()
            .wrap_err_with(|| format!("failed to sync mapping of '{}'", self.path.display()))
    }

    fn physical_len(&self) -> Result<u64> {
        Ok(self.map.read().len() as u64)
    }

    fn remove(&self) -> Result<()> {
        std::fs::remove_file(&self.path)
            .wrap_err_with(|| format!("failed to delete '{}'", self.path.display()))
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Heap-backed driver for in-memory databases. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    bytes: RwLock<Vec<u8>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreDriver for MemoryDriver {
    fn read_at(&self, buf: &mut [u8], position: u64) -> Result<()> {
        let bytes = self.bytes.read();
        let start = position as usize;
        ensure!(
            start + buf.len() <= bytes.len(),
            "read of {} bytes at {} beyond {} bytes",
            buf.len(),
            position,
            bytes.len()
        );
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, data: &[u8], position: u64) -> Result<()> {
        let mut bytes = self.bytes.write();
        let end = position as usize + data.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[position as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn ensure_capacity(&self, end: u64) -> Result<()> {
        let mut bytes = self.bytes.write();
        if (end as usize) > bytes.len() {
            bytes.resize(end as usize, 0);
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn physical_len(&self) -> Result<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn remove(&self) -> Result<()> {
        self.bytes.write().clear();
        Ok(())
    }
}
