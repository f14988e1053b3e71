//! # Transaction Log
//!
//! Append-only journal of record mutations. Every save and delete is appended
//! before the data file is touched, so an external recovery step can redo or
//! identify what happened since the last commit of the data files.
//!
//! ## Directory Layout
//!
//! ```text
//! location/
//! └── wal/
//!     ├── 0.wal       # first journal file
//!     ├── 1.wal       # after the first rotation
//!     └── 2.wal       # active
//! ```
//!
//! On open, the highest existing index becomes the active file and new
//! entries are appended to it. Once the active file grows past the ceiling
//! (`JOURNAL_MAX_FILE_SIZE`, 20 MiB) the next append rotates into
//! `<index + 1>.wal`. Journal files are never truncated or compacted.
//!
//! ## Entry Format
//!
//! ```text
//! +----------------------+-----------------------------------------+
//! | JournalEntryHeader   | payload (ObjectBuffer values)           |
//! | (24 bytes)           | type, partition, identifier [, record]  |
//! +----------------------+-----------------------------------------+
//! ```
//!
//! The header carries the entry kind, payload length, a monotonically
//! increasing sequence number and a CRC-64 over kind, sequence and payload.
//! A reader that hits a truncated or corrupt entry treats it as end of log.
//!
//! ## Concurrency
//!
//! The active file sits behind a `parking_lot::ReentrantMutex`. Appends,
//! rotation and `sync` all take it, so rotation attempts are serialized and
//! an append that triggers rotation re-enters the lock it already holds.

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result, WrapErr};
use parking_lot::ReentrantMutex;
use tracing::{debug, info, warn};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{JOURNAL_ENTRY_HEADER_SIZE, JOURNAL_EXTENSION};
use crate::encoding::{ObjectBuffer, ObjectReader};
use crate::error::EntityError;
use crate::types::Value;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEntryKind {
    Save = 1,
    Delete = 2,
}

impl JournalEntryKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Save),
            2 => Some(Self::Delete),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct JournalEntryHeader {
    kind: u8,
    _reserved: [u8; 3],
    payload_len: U32,
    sequence: U64,
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<JournalEntryHeader>() == JOURNAL_ENTRY_HEADER_SIZE);

impl JournalEntryHeader {
    pub fn new(kind: JournalEntryKind, sequence: u64, payload: &[u8]) -> Self {
        let mut header = Self {
            kind: kind as u8,
            _reserved: [0; 3],
            payload_len: U32::new(payload.len() as u32),
            sequence: U64::new(sequence),
            checksum: U64::new(0),
        };
        header.set_checksum(header.compute_checksum(payload));
        header
    }

    zerocopy_accessors! {
        payload_len: u32,
        sequence: u64,
        checksum: u64,
    }

    pub fn kind(&self) -> Option<JournalEntryKind> {
        JournalEntryKind::from_u8(self.kind)
    }

    pub fn compute_checksum(&self, payload: &[u8]) -> u64 {
        let mut digest = CRC64.digest();
        digest.update(&[self.kind]);
        digest.update(&self.sequence().to_le_bytes());
        digest.update(&self.payload_len().to_le_bytes());
        digest.update(payload);
        digest.finalize()
    }

    pub fn validate(&self, payload: &[u8]) -> bool {
        self.compute_checksum(payload) == self.checksum()
    }
}

/// One decoded journal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub kind: JournalEntryKind,
    pub sequence: u64,
    pub type_name: String,
    pub partition: Value,
    pub identifier: Value,
    /// Encoded record bytes for saves.
    pub record: Option<Vec<u8>>,
}

impl JournalEntry {
    fn encode_payload(&self) -> Vec<u8> {
        let mut buf = ObjectBuffer::new();
        buf.put_value(&Value::Text(self.type_name.clone()));
        buf.put_value(&self.partition);
        buf.put_value(&self.identifier);
        if let Some(record) = &self.record {
            buf.put_value(&Value::Bytes(record.clone()));
        }
        buf.into_bytes()
    }

    fn decode(header: &JournalEntryHeader, payload: &[u8]) -> Result<Self> {
        let Some(kind) = header.kind() else {
            bail!("unknown journal entry kind at sequence {}", header.sequence());
        };

        let mut reader = ObjectReader::new(payload);
        let type_name = match reader.read_value()? {
            Value::Text(name) => name,
            other => bail!("journal entry type name is {}, expected text", other.type_name()),
        };
        let partition = reader.read_value()?;
        let identifier = reader.read_value()?;
        let record = match kind {
            JournalEntryKind::Save => match reader.read_value()? {
                Value::Bytes(bytes) => Some(bytes),
                other => bail!("journal save payload is {}, expected bytes", other.type_name()),
            },
            JournalEntryKind::Delete => None,
        };

        Ok(Self {
            kind,
            sequence: header.sequence(),
            type_name,
            partition,
            identifier,
            record,
        })
    }
}

#[derive(Debug)]
struct JournalFile {
    index: u64,
    path: PathBuf,
    file: File,
    size: u64,
}

impl JournalFile {
    fn open(dir: &Path, index: u64) -> Result<Self> {
        let path = journal_path(dir, index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open journal file {:?}", path))?;
        let size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat journal file {:?}", path))?
            .len();

        Ok(Self {
            index,
            path,
            file,
            size,
        })
    }
}

pub fn journal_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}.{}", index, JOURNAL_EXTENSION))
}

/// Indexes of the journal files present in `dir`, ascending.
pub fn journal_indexes(dir: &Path) -> Result<Vec<u64>> {
    let mut indexes = Vec::new();
    if !dir.exists() {
        return Ok(indexes);
    }

    for entry in fs::read_dir(dir).wrap_err_with(|| format!("failed to list {:?}", dir))? {
        let path = entry.wrap_err("failed to read journal directory entry")?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(JOURNAL_EXTENSION) {
            continue;
        }
        if let Some(index) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            indexes.push(index);
        }
    }

    indexes.sort_unstable();
    Ok(indexes)
}

fn transaction_error(reason: String) -> eyre::Report {
    EntityError::Transaction { reason }.into()
}

pub struct TransactionLog {
    dir: PathBuf,
    max_file_size: u64,
    sync_on_append: bool,
    active: ReentrantMutex<RefCell<JournalFile>>,
    next_sequence: AtomicU64,
}

impl std::fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLog")
            .field("dir", &self.dir)
            .field("max_file_size", &self.max_file_size)
            .field("next_sequence", &self.next_sequence.load(Ordering::Relaxed))
            .finish()
    }
}

impl TransactionLog {
    /// Opens the journal in `dir`, continuing the highest-numbered file.
    pub fn open(dir: &Path, max_file_size: u64, sync_on_append: bool) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| transaction_error(format!("cannot create journal directory {:?}: {}", dir, e)))?;

        let index = journal_indexes(dir)?.last().copied().unwrap_or(0);
        let active = JournalFile::open(dir, index)
            .map_err(|e| transaction_error(format!("cannot open journal file {}: {:#}", index, e)))?;

        let last_sequence = Self::read_entries(&active.path)?
            .last()
            .map(|entry| entry.sequence + 1)
            .unwrap_or(0);

        info!(dir = ?dir, index, size = active.size, "opened transaction log");

        Ok(Self {
            dir: dir.to_path_buf(),
            max_file_size,
            sync_on_append,
            active: ReentrantMutex::new(RefCell::new(active)),
            next_sequence: AtomicU64::new(last_sequence),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_index(&self) -> u64 {
        self.active.lock().borrow().index
    }

    pub fn current_path(&self) -> PathBuf {
        self.active.lock().borrow().path.clone()
    }

    pub fn files(&self) -> Result<Vec<PathBuf>> {
        Ok(journal_indexes(&self.dir)?
            .into_iter()
            .map(|index| journal_path(&self.dir, index))
            .collect())
    }

    /// Runs `f` against the active journal file, rotating first when the
    /// file has outgrown the ceiling.
    fn with_active_file<R>(&self, f: impl FnOnce(&mut JournalFile) -> Result<R>) -> Result<R> {
        let guard = self.active.lock();
        self.rotate_if_needed()?;
        let mut file = guard.borrow_mut();
        f(&mut file)
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let guard = self.active.lock();
        let (index, size) = {
            let file = guard.borrow();
            (file.index, file.size)
        };
        if size <= self.max_file_size {
            return Ok(());
        }

        let next = JournalFile::open(&self.dir, index + 1)
            .map_err(|e| transaction_error(format!("cannot rotate journal to {}: {:#}", index + 1, e)))?;
        let previous = guard.replace(next);
        if let Err(err) = previous.file.sync_all() {
            warn!(index, error = %err, "failed to sync rotated journal file");
        }

        info!(from = index, to = index + 1, size, "rotated transaction log");
        Ok(())
    }

    fn append(&self, mut entry: JournalEntry) -> Result<u64> {
        self.with_active_file(|file| {
            entry.sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
            let payload = entry.encode_payload();
            let header = JournalEntryHeader::new(entry.kind, entry.sequence, &payload);

            let mut frame = Vec::with_capacity(JOURNAL_ENTRY_HEADER_SIZE + payload.len());
            frame.extend_from_slice(header.as_bytes());
            frame.extend_from_slice(&payload);

            file.file.write_all(&frame).map_err(|e| {
                transaction_error(format!("cannot append to journal {:?}: {}", file.path, e))
            })?;
            if self.sync_on_append {
                file.file.sync_data().map_err(|e| {
                    transaction_error(format!("cannot sync journal {:?}: {}", file.path, e))
                })?;
            }
            file.size += frame.len() as u64;

            Ok(entry.sequence)
        })
    }

    pub fn append_save(
        &self,
        type_name: &str,
        partition: &Value,
        identifier: &Value,
        record: &[u8],
    ) -> Result<u64> {
        self.append(JournalEntry {
            kind: JournalEntryKind::Save,
            sequence: 0,
            type_name: type_name.to_string(),
            partition: partition.clone(),
            identifier: identifier.clone(),
            record: Some(record.to_vec()),
        })
    }

    pub fn append_delete(&self, type_name: &str, partition: &Value, identifier: &Value) -> Result<u64> {
        self.append(JournalEntry {
            kind: JournalEntryKind::Delete,
            sequence: 0,
            type_name: type_name.to_string(),
            partition: partition.clone(),
            identifier: identifier.clone(),
            record: None,
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.with_active_file(|file| {
            file.file
                .sync_all()
                .wrap_err_with(|| format!("failed to sync journal {:?}", file.path))
        })
    }

    /// Decodes every intact entry of one journal file. Decoding stops at the
    /// first truncated or corrupt entry.
    pub fn read_entries(path: &Path) -> Result<Vec<JournalEntry>> {
        let mut bytes = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut bytes)
                    .wrap_err_with(|| format!("failed to read journal {:?}", path))?;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).wrap_err_with(|| format!("failed to open journal {:?}", path));
            }
        }

        let mut entries = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            if bytes.len() - offset < JOURNAL_ENTRY_HEADER_SIZE {
                warn!(path = ?path, offset, "truncated journal entry header");
                break;
            }

            let header = match JournalEntryHeader::read_from_bytes(
                &bytes[offset..offset + JOURNAL_ENTRY_HEADER_SIZE],
            ) {
                Ok(header) => header,
                Err(_) => break,
            };
            let start = offset + JOURNAL_ENTRY_HEADER_SIZE;
            let end = start + header.payload_len() as usize;
            if end > bytes.len() {
                warn!(path = ?path, offset, "truncated journal entry payload");
                break;
            }

            let payload = &bytes[start..end];
            if !header.validate(payload) {
                warn!(path = ?path, offset, "journal entry checksum mismatch");
                break;
            }

            entries.push(JournalEntry::decode(&header, payload)?);
            offset = end;
        }

        debug!(path = ?path, entries = entries.len(), "read journal");
        Ok(entries)
    }
}

/// Reads every entry of every journal file in `dir`, oldest file first.
pub fn read_all_entries(dir: &Path) -> Result<Vec<JournalEntry>> {
    let mut entries = Vec::new();
    for index in journal_indexes(dir)? {
        entries.extend(TransactionLog::read_entries(&journal_path(dir, index))?);
    }
    ensure!(
        entries.windows(2).all(|w| w[0].sequence < w[1].sequence),
        "journal sequence numbers in {:?} are not increasing",
        dir
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn journal_entry_header_is_24_bytes() {
        assert_eq!(std::mem::size_of::<JournalEntryHeader>(), 24);
    }

    #[test]
    fn checksum_detects_payload_corruption() {
        let header = JournalEntryHeader::new(JournalEntryKind::Save, 7, b"payload");
        assert!(header.validate(b"payload"));
        assert!(!header.validate(b"paylaod"));
    }

    #[test]
    fn fresh_journal_starts_at_index_zero() {
        let dir = tempdir().unwrap();
        let log = TransactionLog::open(&dir.path().join("wal"), 1024, false).unwrap();
        assert_eq!(log.current_index(), 0);
        assert!(log.current_path().ends_with("0.wal"));
    }

    #[test]
    fn appended_entries_read_back_in_order() {
        let dir = tempdir().unwrap();
        let wal = dir.path().join("wal");
        let log = TransactionLog::open(&wal, 1 << 20, true).unwrap();

        log.append_save("Person", &Value::Null, &Value::Long(1), b"rec-1").unwrap();
        log.append_delete("Person", &Value::Text("eu".into()), &Value::Long(1)).unwrap();

        let entries = TransactionLog::read_entries(&log.current_path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, JournalEntryKind::Save);
        assert_eq!(entries[0].record.as_deref(), Some(&b"rec-1"[..]));
        assert_eq!(entries[1].kind, JournalEntryKind::Delete);
        assert_eq!(entries[1].partition, Value::Text("eu".into()));
        assert!(entries[0].sequence < entries[1].sequence);
    }

    #[test]
    fn rotates_once_ceiling_is_exceeded() {
        let dir = tempdir().unwrap();
        let wal = dir.path().join("wal");
        let log = TransactionLog::open(&wal, 64, false).unwrap();

        for i in 0..10 {
            log.append_save("T", &Value::Null, &Value::Long(i), &[0u8; 32]).unwrap();
        }

        assert!(log.current_index() > 0);
        let files = log.files().unwrap();
        assert_eq!(files.len() as u64, log.current_index() + 1);
        assert_eq!(read_all_entries(&wal).unwrap().len(), 10);
    }

    #[test]
    fn reopen_continues_highest_file_and_sequence() {
        let dir = tempdir().unwrap();
        let wal = dir.path().join("wal");

        let last = {
            let log = TransactionLog::open(&wal, 64, false).unwrap();
            let mut last = 0;
            for i in 0..6 {
                last = log.append_save("T", &Value::Null, &Value::Long(i), &[1u8; 40]).unwrap();
            }
            last
        };
        let highest = *journal_indexes(&wal).unwrap().last().unwrap();

        let log = TransactionLog::open(&wal, 64, false).unwrap();
        assert_eq!(log.current_index(), highest);
        let next = log.append_delete("T", &Value::Null, &Value::Long(0)).unwrap();
        assert!(next > last);
    }

    #[test]
    fn corrupt_tail_is_treated_as_end_of_log() {
        let dir = tempdir().unwrap();
        let wal = dir.path().join("wal");
        let log = TransactionLog::open(&wal, 1 << 20, false).unwrap();
        log.append_save("T", &Value::Null, &Value::Long(1), b"ok").unwrap();
        log.append_save("T", &Value::Null, &Value::Long(2), b"ok").unwrap();
        log.sync().unwrap();

        let path = log.current_path();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let entries = TransactionLog::read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identifier, Value::Long(1));
    }

    #[test]
    fn journal_open_failure_is_a_transaction_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();

        let err = TransactionLog::open(&blocker.join("wal"), 1024, false).unwrap_err();
        assert_eq!(
            err.downcast_ref::<EntityError>().map(EntityError::kind),
            Some("transaction")
        );
    }
}
