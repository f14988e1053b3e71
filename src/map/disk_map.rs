//! # Persistent Map
//!
//! `DiskMap` is a disk-resident hash map from keys (encoded `Value`s) to byte
//! values, living entirely inside one [`Store`]. Records, index entries,
//! relationship lists, sequence counters and the serializer registry are all
//! stored in maps of this kind.
//!
//! ## On-Disk Layout
//!
//! ```text
//! MapHeader (24 B)                 Directory (bucket_count x u64)
//! +-----------+-------+-------+    +------+------+------+-----+
//! | directory | count | items | -> | head | head | 0    | ... |
//! +-----------+-------+-------+    +--+---+------+------+-----+
//!                                     │
//!                                     ▼
//!     Node: +------+------+---------+-----------+-----+-------+
//!           | next | hash | key_len | value_len | key | value |
//!           +--+---+------+---------+-----------+-----+-------+
//!              └──> next node in the bucket chain (0 = end)
//! ```
//!
//! The position of a node is its **reference**. Nodes are never modified in
//! place except for their `next` link: replacing a value allocates a new node,
//! links it where the old one was and reclaims the old region. A reference
//! therefore always points at one immutable key/value pair for as long as the
//! entry is not replaced or removed.
//!
//! ## Hashing and Growth
//!
//! Keys hash with CRC-64 (ECMA-182) over their encoded bytes; the bucket is
//! `hash & (bucket_count - 1)`. When the average chain length exceeds
//! `MAX_BUCKET_LOAD`, the next writer doubles the directory under the global
//! write lock, relinking every node into its new bucket. Nodes do not move.
//!
//! ## Locking
//!
//! Bucket `b` is guarded by shard `b % LOCK_SHARD_COUNT` of a [`ShardedLock`].
//! `lock_key` returns a [`KeyGuard`] holding the shard exclusively, so a
//! read-modify-write on one key is atomic with respect to every other access
//! to that key. Reads by reference only take the global lock in shared mode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, eyre, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{info, warn};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::lock::{ShardReadGuard, ShardWriteGuard, ShardedLock};
use crate::config::{DEFAULT_BUCKET_COUNT, MAP_HEADER_SIZE, MAX_BUCKET_LOAD, NODE_HEADER_SIZE};
use crate::encoding::{decode_value, encode_value, read_record_attribute};
use crate::storage::Store;
use crate::types::Value;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub fn hash_key(key: &[u8]) -> u64 {
    CRC64.checksum(key)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MapHeader {
    directory: U64,
    bucket_count: U64,
    entry_count: U64,
}

const _: () = assert!(std::mem::size_of::<MapHeader>() as u64 == MAP_HEADER_SIZE);

impl MapHeader {
    pub fn new(directory: u64, bucket_count: u64, entry_count: u64) -> Self {
        Self {
            directory: U64::new(directory),
            bucket_count: U64::new(bucket_count),
            entry_count: U64::new(entry_count),
        }
    }

    zerocopy_accessors! {
        directory: u64,
        bucket_count: u64,
        entry_count: u64,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NodeHeader {
    next: U64,
    hash: U64,
    key_len: U32,
    value_len: U32,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() as u64 == NODE_HEADER_SIZE);

impl NodeHeader {
    pub fn new(next: u64, hash: u64, key_len: u32, value_len: u32) -> Self {
        Self {
            next: U64::new(next),
            hash: U64::new(hash),
            key_len: U32::new(key_len),
            value_len: U32::new(value_len),
        }
    }

    zerocopy_accessors! {
        next: u64,
        hash: u64,
        key_len: u32,
        value_len: u32,
    }

    pub fn node_size(&self) -> u64 {
        NODE_HEADER_SIZE + self.key_len() as u64 + self.value_len() as u64
    }

    fn value_offset(&self) -> u64 {
        NODE_HEADER_SIZE + self.key_len() as u64
    }
}

struct Located {
    prev: Option<u64>,
    position: u64,
    header: NodeHeader,
}

pub struct DiskMap {
    store: Arc<Store>,
    name: String,
    header_position: u64,
    directory: AtomicU64,
    bucket_count: AtomicU64,
    entry_count: AtomicU64,
    lock: ShardedLock,
    header_lock: Mutex<()>,
}

impl std::fmt::Debug for DiskMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskMap")
            .field("name", &self.name)
            .field("header_position", &self.header_position)
            .field("bucket_count", &self.bucket_count())
            .field("len", &self.len())
            .finish()
    }
}

impl DiskMap {
    /// Allocates a new empty map in `store`.
    pub fn create(store: Arc<Store>, name: &str) -> Result<Self> {
        let header_position = store.allocate(MAP_HEADER_SIZE)?;
        let directory_size = DEFAULT_BUCKET_COUNT * 8;
        let directory = store.allocate(directory_size)?;
        store.write(&vec![0u8; directory_size as usize], directory)?;

        let map = Self {
            store,
            name: name.to_string(),
            header_position,
            directory: AtomicU64::new(directory),
            bucket_count: AtomicU64::new(DEFAULT_BUCKET_COUNT),
            entry_count: AtomicU64::new(0),
            lock: ShardedLock::new(),
            header_lock: Mutex::new(()),
        };
        map.write_header()?;
        Ok(map)
    }

    /// Opens the map whose header sits at `header_position`.
    pub fn open(store: Arc<Store>, name: &str, header_position: u64) -> Result<Self> {
        let bytes = store
            .read(header_position, MAP_HEADER_SIZE as usize)
            .ok_or_else(|| eyre!("map '{}' header at {} is unreadable", name, header_position))?;
        let header = MapHeader::read_from_bytes(&bytes)
            .map_err(|e| eyre!("invalid header for map '{}': {:?}", name, e))?;

        ensure!(
            header.bucket_count().is_power_of_two(),
            "map '{}' has corrupt bucket count {}",
            name,
            header.bucket_count()
        );

        Ok(Self {
            store,
            name: name.to_string(),
            header_position,
            directory: AtomicU64::new(header.directory()),
            bucket_count: AtomicU64::new(header.bucket_count()),
            entry_count: AtomicU64::new(header.entry_count()),
            lock: ShardedLock::new(),
            header_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header_position(&self) -> u64 {
        self.header_position
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn len(&self) -> u64 {
        self.entry_count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count.load(Ordering::Acquire)
    }

    pub fn lock_stats(&self) -> &super::lock::LockStats {
        self.lock.stats()
    }

    fn write_header(&self) -> Result<()> {
        let _guard = self.header_lock.lock();
        let header = MapHeader::new(
            self.directory.load(Ordering::Acquire),
            self.bucket_count.load(Ordering::Acquire),
            self.entry_count.load(Ordering::Acquire),
        );
        self.store
            .write(header.as_bytes(), self.header_position)
            .wrap_err_with(|| format!("failed to write header of map '{}'", self.name))?;
        Ok(())
    }

    fn read_u64(&self, position: u64) -> Result<u64> {
        let bytes = self
            .store
            .read(position, 8)
            .ok_or_else(|| eyre!("map '{}': unreadable slot at {}", self.name, position))?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn write_u64(&self, position: u64, value: u64) -> Result<()> {
        self.store.write(&value.to_le_bytes(), position)?;
        Ok(())
    }

    fn slot_position(&self, bucket: u64) -> u64 {
        self.directory.load(Ordering::Acquire) + bucket * 8
    }

    /// Reads and sanity-checks a node header. `None` when the position does
    /// not hold a plausible node.
    fn try_node_header(&self, position: u64) -> Option<NodeHeader> {
        let bytes = self.store.read(position, NODE_HEADER_SIZE as usize)?;
        let header = NodeHeader::read_from_bytes(&bytes).ok()?;
        let end = position.checked_add(header.node_size())?;
        (end <= self.store.file_size()).then_some(header)
    }

    fn node_header(&self, position: u64) -> Result<NodeHeader> {
        self.try_node_header(position)
            .ok_or_else(|| eyre!("map '{}': corrupt node at {}", self.name, position))
    }

    fn node_key(&self, position: u64, header: &NodeHeader) -> Option<Vec<u8>> {
        self.store
            .read(position.checked_add(NODE_HEADER_SIZE)?, header.key_len() as usize)
    }

    fn node_value(&self, position: u64, header: &NodeHeader) -> Option<Vec<u8>> {
        self.store
            .read(position.checked_add(header.value_offset())?, header.value_len() as usize)
    }

    fn locate(&self, bucket: u64, key: &[u8], hash: u64) -> Result<Option<Located>> {
        let mut prev = None;
        let mut position = self.read_u64(self.slot_position(bucket))?;

        while position != 0 {
            let header = self.node_header(position)?;
            if header.hash() == hash && header.key_len() as usize == key.len() {
                let stored = self
                    .node_key(position, &header)
                    .ok_or_else(|| eyre!("map '{}': unreadable key at {}", self.name, position))?;
                if stored == key {
                    return Ok(Some(Located {
                        prev,
                        position,
                        header,
                    }));
                }
            }
            prev = Some(position);
            position = header.next();
        }

        Ok(None)
    }

    fn link(&self, bucket: u64, prev: Option<u64>, target: u64) -> Result<()> {
        match prev {
            None => self.write_u64(self.slot_position(bucket), target),
            Some(prev) => self.write_u64(prev, target),
        }
    }

    fn put_in_bucket(&self, bucket: u64, key: &[u8], hash: u64, value: &[u8]) -> Result<u64> {
        let replaced = self.replace_in_bucket(bucket, key, hash, value)?;
        if let Some((position, size)) = replaced.superseded {
            self.release(position, size)?;
        }
        Ok(replaced.position)
    }

    /// Writes a new node for `key` and unlinks the old one, leaving the old
    /// node allocated.
    fn replace_in_bucket(&self, bucket: u64, key: &[u8], hash: u64, value: &[u8]) -> Result<Replaced> {
        let existing = self.locate(bucket, key, hash)?;

        let next = match &existing {
            Some(found) => found.header.next(),
            None => self.read_u64(self.slot_position(bucket))?,
        };
        let header = NodeHeader::new(next, hash, key.len() as u32, value.len() as u32);

        let mut node = Vec::with_capacity(header.node_size() as usize);
        node.extend_from_slice(header.as_bytes());
        node.extend_from_slice(key);
        node.extend_from_slice(value);

        let position = self.store.allocate(header.node_size())?;
        self.store.write(&node, position)?;

        let superseded = match existing {
            Some(found) => {
                self.link(bucket, found.prev, position)?;
                Some((found.position, found.header.node_size()))
            }
            None => {
                self.link(bucket, None, position)?;
                self.entry_count.fetch_add(1, Ordering::AcqRel);
                self.write_header()?;
                None
            }
        };

        Ok(Replaced { position, superseded })
    }

    /// Returns a node superseded by [`KeyGuard::replace`] to the store.
    pub fn release(&self, position: u64, size: u64) -> Result<()> {
        self.store.deallocate(position, size)
    }

    fn remove_in_bucket(&self, bucket: u64, key: &[u8], hash: u64) -> Result<Option<Vec<u8>>> {
        let Some(found) = self.locate(bucket, key, hash)? else {
            return Ok(None);
        };

        let value = self.node_value(found.position, &found.header);
        self.link(bucket, found.prev, found.header.next())?;
        self.store
            .deallocate(found.position, found.header.node_size())?;
        self.entry_count.fetch_sub(1, Ordering::AcqRel);
        self.write_header()?;

        Ok(Some(value.unwrap_or_default()))
    }

    fn maybe_grow(&self) -> Result<()> {
        if self.len() > self.bucket_count() * MAX_BUCKET_LOAD {
            self.grow()?;
        }
        Ok(())
    }

    /// Doubles the directory and relinks every node into its new bucket.
    fn grow(&self) -> Result<()> {
        let _all = self.lock.write_all();

        let old_count = self.bucket_count();
        if self.len() <= old_count * MAX_BUCKET_LOAD {
            return Ok(());
        }

        let new_count = old_count * 2;
        let old_directory = self.directory.load(Ordering::Acquire);
        let new_directory = self.store.allocate(new_count * 8)?;

        let mut slots = vec![0u64; new_count as usize];
        for bucket in 0..old_count {
            let mut position = self.read_u64(old_directory + bucket * 8)?;
            while position != 0 {
                let header = self.node_header(position)?;
                let target = (header.hash() & (new_count - 1)) as usize;
                self.write_u64(position, slots[target])?;
                slots[target] = position;
                position = header.next();
            }
        }

        let bytes: Vec<u8> = slots.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.store.write(&bytes, new_directory)?;

        self.directory.store(new_directory, Ordering::Release);
        self.bucket_count.store(new_count, Ordering::Release);
        self.write_header()?;
        self.store.deallocate(old_directory, old_count * 8)?;

        info!(map = %self.name, from = old_count, to = new_count, entries = self.len(), "grew map directory");
        Ok(())
    }

    fn bucket_for(&self, hash: u64) -> u64 {
        hash & (self.bucket_count() - 1)
    }

    fn read_key(&self, key: &Value) -> (Vec<u8>, u64, u64, ShardReadGuard<'_>) {
        let bytes = encode_value(key);
        let hash = hash_key(&bytes);
        loop {
            let count = self.bucket_count();
            let bucket = hash & (count - 1);
            let guard = self.lock.read_shard(self.lock.shard_for(bucket));
            if self.bucket_count() == count {
                return (bytes, hash, bucket, guard);
            }
        }
    }

    /// Lock shard currently guarding `key`.
    pub fn shard_of(&self, key: &Value) -> usize {
        let hash = hash_key(&encode_value(key));
        self.lock.shard_for(self.bucket_for(hash))
    }

    /// Locks `key` exclusively. Operations through the guard see and produce
    /// a consistent state for that key until the guard drops.
    pub fn lock_key(&self, key: &Value) -> Result<KeyGuard<'_>> {
        self.maybe_grow()?;

        let bytes = encode_value(key);
        let hash = hash_key(&bytes);
        let (bucket, guard) = loop {
            let count = self.bucket_count();
            let bucket = hash & (count - 1);
            let guard = self.lock.write_shard(self.lock.shard_for(bucket));
            if self.bucket_count() == count {
                break (bucket, guard);
            }
        };

        Ok(KeyGuard {
            map: self,
            key: bytes,
            hash,
            bucket,
            _guard: guard,
        })
    }

    pub fn get(&self, key: &Value) -> Result<Option<Vec<u8>>> {
        let (bytes, hash, bucket, _guard) = self.read_key(key);
        match self.locate(bucket, &bytes, hash)? {
            Some(found) => Ok(self.node_value(found.position, &found.header)),
            None => Ok(None),
        }
    }

    pub fn get_value(&self, key: &Value) -> Result<Option<Value>> {
        self.get(key)?.map(|bytes| decode_value(&bytes)).transpose()
    }

    pub fn get_reference(&self, key: &Value) -> Result<Option<u64>> {
        let (bytes, hash, bucket, _guard) = self.read_key(key);
        Ok(self.locate(bucket, &bytes, hash)?.map(|found| found.position))
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool> {
        Ok(self.get_reference(key)?.is_some())
    }

    /// Inserts or replaces `key`, returning the reference of the new entry.
    pub fn put(&self, key: &Value, value: &[u8]) -> Result<u64> {
        self.lock_key(key)?.put(value)
    }

    pub fn put_value(&self, key: &Value, value: &Value) -> Result<u64> {
        self.put(key, &encode_value(value))
    }

    pub fn remove(&self, key: &Value) -> Result<Option<Vec<u8>>> {
        self.lock_key(key)?.remove()
    }

    /// Value bytes of the entry at `reference`, or `None` when the reference
    /// does not resolve.
    pub fn get_by_reference(&self, reference: u64) -> Option<Vec<u8>> {
        let _guard = self.lock.read_all_recursive();
        let header = self.try_node_header(reference)?;
        self.node_value(reference, &header)
    }

    /// Key and value bytes of the entry at `reference`.
    pub fn get_entry_by_reference(&self, reference: u64) -> Option<(Value, Vec<u8>)> {
        let _guard = self.lock.read_all_recursive();
        let header = self.try_node_header(reference)?;
        let key = decode_value(&self.node_key(reference, &header)?).ok()?;
        Some((key, self.node_value(reference, &header)?))
    }

    pub fn get_key_by_reference(&self, reference: u64) -> Option<Value> {
        let _guard = self.lock.read_all_recursive();
        let header = self.try_node_header(reference)?;
        decode_value(&self.node_key(reference, &header)?).ok()
    }

    /// Reads one attribute of the record stored at `reference` without
    /// decoding the rest of it. A record without that attribute yields
    /// `Some(Value::Null)`; an unresolvable reference yields `None`.
    pub fn get_attribute_by_reference(&self, attribute: &str, reference: u64) -> Option<Value> {
        let bytes = self.get_by_reference(reference)?;
        match read_record_attribute(&bytes, attribute) {
            Ok(value) => Some(value.unwrap_or(Value::Null)),
            Err(err) => {
                warn!(map = %self.name, reference, attribute, error = %err, "undecodable record");
                None
            }
        }
    }

    fn walk(&self, mut visit: impl FnMut(u64, &NodeHeader) -> Result<()>) -> Result<()> {
        for bucket in 0..self.bucket_count() {
            let mut position = self.read_u64(self.slot_position(bucket))?;
            while position != 0 {
                let header = self.node_header(position)?;
                visit(position, &header)?;
                position = header.next();
            }
        }
        Ok(())
    }

    /// Snapshot of every entry reference.
    pub fn references(&self) -> Result<Vec<u64>> {
        let _all = self.lock.read_all();
        let mut references = Vec::with_capacity(self.len() as usize);
        self.walk(|position, _| {
            references.push(position);
            Ok(())
        })?;
        Ok(references)
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Result<Vec<(Value, Vec<u8>)>> {
        let _all = self.lock.read_all();
        let mut entries = Vec::with_capacity(self.len() as usize);
        self.walk(|position, header| {
            let key = self
                .node_key(position, header)
                .ok_or_else(|| eyre!("map '{}': unreadable key at {}", self.name, position))?;
            let value = self
                .node_value(position, header)
                .ok_or_else(|| eyre!("map '{}': unreadable value at {}", self.name, position))?;
            entries.push((decode_value(&key)?, value));
            Ok(())
        })?;
        Ok(entries)
    }

    pub fn keys(&self) -> Result<Vec<Value>> {
        Ok(self.entries()?.into_iter().map(|(key, _)| key).collect())
    }

    /// Removes every entry, keeping the map itself.
    pub fn clear(&self) -> Result<()> {
        let _all = self.lock.write_all();

        let mut nodes = Vec::new();
        self.walk(|position, header| {
            nodes.push((position, header.node_size()));
            Ok(())
        })?;

        let count = self.bucket_count();
        self.store
            .write(&vec![0u8; (count * 8) as usize], self.directory.load(Ordering::Acquire))?;
        for (position, size) in nodes {
            self.store.deallocate(position, size)?;
        }

        self.entry_count.store(0, Ordering::Release);
        self.write_header()
    }

    /// Removes every entry and releases the directory and header regions.
    /// The map must not be used afterwards.
    pub fn destroy(&self) -> Result<()> {
        self.clear()?;
        let _all = self.lock.write_all();
        self.store
            .deallocate(self.directory.load(Ordering::Acquire), self.bucket_count() * 8)?;
        self.store.deallocate(self.header_position, MAP_HEADER_SIZE)
    }
}

/// Outcome of [`KeyGuard::replace`]: the new node and the `(position, size)`
/// of the node it superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replaced {
    pub position: u64,
    pub superseded: Option<(u64, u64)>,
}

/// Exclusive hold on one key of a [`DiskMap`].
pub struct KeyGuard<'a> {
    map: &'a DiskMap,
    key: Vec<u8>,
    hash: u64,
    bucket: u64,
    _guard: ShardWriteGuard<'a>,
}

impl KeyGuard<'_> {
    pub fn get(&self) -> Result<Option<Vec<u8>>> {
        match self.map.locate(self.bucket, &self.key, self.hash)? {
            Some(found) => Ok(self.map.node_value(found.position, &found.header)),
            None => Ok(None),
        }
    }

    pub fn get_value(&self) -> Result<Option<Value>> {
        self.get()?.map(|bytes| decode_value(&bytes)).transpose()
    }

    pub fn reference(&self) -> Result<Option<u64>> {
        Ok(self
            .map
            .locate(self.bucket, &self.key, self.hash)?
            .map(|found| found.position))
    }

    pub fn put(&self, value: &[u8]) -> Result<u64> {
        self.map.put_in_bucket(self.bucket, &self.key, self.hash, value)
    }

    /// Like `put`, but the node being replaced stays allocated until the
    /// caller passes it to [`DiskMap::release`]. Until then its position
    /// cannot be handed out to another key.
    pub fn replace(&self, value: &[u8]) -> Result<Replaced> {
        self.map.replace_in_bucket(self.bucket, &self.key, self.hash, value)
    }

    pub fn put_value(&self, value: &Value) -> Result<u64> {
        self.put(&encode_value(value))
    }

    pub fn remove(&self) -> Result<Option<Vec<u8>>> {
        self.map.remove_in_bucket(self.bucket, &self.key, self.hash)
    }
}
