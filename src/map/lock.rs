//! # Sharded Lock
//!
//! A global read/write lock plus `LOCK_SHARD_COUNT` independent shard locks.
//! Persistent maps use it to let operations on different buckets proceed in
//! parallel while keeping whole-structure work (directory growth, clear)
//! exclusive.
//!
//! ## Protocol
//!
//! ```text
//! single-bucket read   : global.read  + shard.read
//! single-bucket write  : global.read  + shard.write
//! bulk scan            : global.read
//! rehash / clear       : global.write
//! ```
//!
//! The global lock is always taken before a shard lock, so the two levels
//! never deadlock against each other. A thread must not take the global read
//! lock twice: with a writer queued, the second read would wait behind it.
//!
//! ## Fairness
//!
//! `parking_lot::RwLock` is task-fair: once a writer is queued, new readers
//! queue behind it, so sustained read traffic cannot starve a rehash.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::LOCK_SHARD_COUNT;

#[derive(Debug, Default)]
pub struct LockStats {
    pub shard_locks_acquired: AtomicU64,
    pub shard_locks_contended: AtomicU64,
    pub global_write_locks: AtomicU64,
}

impl LockStats {
    fn record_shard_lock(&self, contended: bool) {
        self.shard_locks_acquired.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.shard_locks_contended.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
pub struct ShardedLock {
    global: RwLock<()>,
    shards: Box<[RwLock<()>]>,
    stats: LockStats,
}

/// Shared access to one shard.
pub struct ShardReadGuard<'a> {
    _global: RwLockReadGuard<'a, ()>,
    _shard: RwLockReadGuard<'a, ()>,
}

/// Exclusive access to one shard, shared access to the structure.
pub struct ShardWriteGuard<'a> {
    _global: RwLockReadGuard<'a, ()>,
    _shard: RwLockWriteGuard<'a, ()>,
}

impl Default for ShardedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedLock {
    pub fn new() -> Self {
        Self::with_shards(LOCK_SHARD_COUNT)
    }

    pub fn with_shards(count: usize) -> Self {
        assert!(count > 0, "a sharded lock needs at least one shard");
        Self {
            global: RwLock::new(()),
            shards: (0..count).map(|_| RwLock::new(())).collect(),
            stats: LockStats::default(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, slot: u64) -> usize {
        (slot % self.shards.len() as u64) as usize
    }

    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    pub fn read_shard(&self, shard: usize) -> ShardReadGuard<'_> {
        let global = self.global.read();
        let lock = &self.shards[shard];
        let (guard, contended) = match lock.try_read() {
            Some(guard) => (guard, false),
            None => (lock.read(), true),
        };
        self.stats.record_shard_lock(contended);
        ShardReadGuard {
            _global: global,
            _shard: guard,
        }
    }

    pub fn write_shard(&self, shard: usize) -> ShardWriteGuard<'_> {
        let global = self.global.read();
        let lock = &self.shards[shard];
        let (guard, contended) = match lock.try_write() {
            Some(guard) => (guard, false),
            None => (lock.write(), true),
        };
        self.stats.record_shard_lock(contended);
        ShardWriteGuard {
            _global: global,
            _shard: guard,
        }
    }

    /// Shared access to the whole structure; excludes only `write_all`.
    pub fn read_all(&self) -> RwLockReadGuard<'_, ()> {
        self.global.read()
    }

    /// Shared access that does not queue behind a waiting writer. Used for
    /// short reads that may run while the caller already holds a read.
    pub fn read_all_recursive(&self) -> RwLockReadGuard<'_, ()> {
        self.global.read_recursive()
    }

    /// Exclusive access to the whole structure.
    pub fn write_all(&self) -> RwLockWriteGuard<'_, ()> {
        self.stats.global_write_locks.fetch_add(1, Ordering::Relaxed);
        self.global.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn default_has_ten_shards() {
        let lock = ShardedLock::new();
        assert_eq!(lock.shard_count(), 10);
        assert_eq!(lock.shard_for(23), 3);
    }

    #[test]
    fn different_shards_do_not_block_each_other() {
        let lock = ShardedLock::new();
        let _a = lock.write_shard(0);
        let _b = lock.write_shard(1);
        let _c = lock.read_shard(2);
    }

    #[test]
    fn readers_share_a_shard() {
        let lock = ShardedLock::new();
        let _a = lock.read_shard(4);
        let _b = lock.read_shard(4);
    }

    #[test]
    fn shard_writers_are_mutually_exclusive() {
        let lock = Arc::new(ShardedLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = lock.write_shard(7);
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(lock.stats().shard_locks_acquired.load(Ordering::Relaxed), 400);
    }

    #[test]
    fn global_write_waits_for_shard_holders() {
        let lock = Arc::new(ShardedLock::new());
        let barrier = Arc::new(Barrier::new(2));
        let released = Arc::new(AtomicUsize::new(0));

        let holder = {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let _guard = lock.write_shard(0);
                barrier.wait();
                thread::sleep(Duration::from_millis(50));
                released.store(1, Ordering::SeqCst);
            })
        };

        barrier.wait();
        let _all = lock.write_all();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        drop(_all);
        holder.join().unwrap();
    }
}
