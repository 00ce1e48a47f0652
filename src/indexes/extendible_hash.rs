use crate::buffer::{AccessType, BufferPoolError, BufferPoolManager};
use crate::indexes::Transaction;
use crate::pages::{
    BUCKET_CAPACITY, DIRECTORY_MAX_DEPTH, HashBucketError, HashDirectoryError, Key, PageId,
    RecordId,
};

use std::sync::{Arc, RwLock};

use log::{debug, warn};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Maps keys to the 32-bit hashes the directory indexes on.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: Key) -> u32;
}

/// Default seeded hasher.
pub struct XxHasher {
    seed: u64,
}

impl XxHasher {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Default for XxHasher {
    fn default() -> Self {
        Self::new(0)
    }
}

impl KeyHasher for XxHasher {
    fn hash(&self, key: Key) -> u32 {
        xxh3_64_with_seed(&key.to_le_bytes(), self.seed) as u32
    }
}

/// A hasher that routes by the key's own bits, so tests can steer keys into
/// chosen buckets.
#[cfg(test)]
pub struct IdentityHasher;

#[cfg(test)]
impl KeyHasher for IdentityHasher {
    fn hash(&self, key: Key) -> u32 {
        key
    }
}

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("split cannot separate colliding keys any further")]
    DepthExhausted,
    #[error("buffer pool")]
    BufferPool(#[from] BufferPoolError),
    #[error("directory")]
    Directory(#[from] HashDirectoryError),
}

/// Disk-backed extendible hash table over `(Key, RecordId)` pairs.
///
/// The table owns one directory page and as many bucket pages as splits have
/// produced, all living in the buffer pool. A key resolves through the low
/// `global_depth` bits of its hash to a directory entry, which names the
/// bucket page to search.
///
/// A table-wide latch protects directory structure: lookups and point
/// inserts run under it in read mode (with the page latches doing the
/// per-page work), splits and merges retake it in write mode and re-resolve
/// their target. Buckets always latch after the directory, never the other
/// way around.
pub struct ExtendibleHashTable<H: KeyHasher = XxHasher> {
    pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hasher: H,
}

impl<H: KeyHasher + Default> ExtendibleHashTable<H> {
    pub fn try_new(pool: Arc<BufferPoolManager>) -> Result<Self, HashTableError> {
        Self::try_with_hasher(pool, H::default())
    }
}

impl<H: KeyHasher> ExtendibleHashTable<H> {
    /// Allocates the directory and the first bucket page.
    pub fn try_with_hasher(
        pool: Arc<BufferPoolManager>,
        hasher: H,
    ) -> Result<Self, HashTableError> {
        let directory_page_id;
        {
            let mut dir_guard = pool.new_page(AccessType::Index)?.into_write();
            directory_page_id = dir_guard.page_id();
            // fresh pages come zeroed, which is a valid empty bucket
            let bucket_guard = pool.new_page(AccessType::Index)?;
            dir_guard
                .as_directory_mut()
                .init(directory_page_id, bucket_guard.page_id());
        }

        Ok(Self {
            pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hasher,
        })
    }

    fn hash(&self, key: Key) -> u32 {
        self.hasher.hash(key)
    }

    /// Collects every record stored under `key`.
    pub fn get_value(
        &self,
        _txn: &Transaction,
        key: Key,
    ) -> Result<Vec<RecordId>, HashTableError> {
        let _table = self.table_latch.read().unwrap();
        let dir_guard = self
            .pool
            .fetch_page_read(self.directory_page_id, AccessType::Lookup)?;
        let dir = dir_guard.as_directory();
        let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
        let bucket_page_id = dir.bucket_page_id(idx);

        let bucket_guard = self.pool.fetch_page_read(bucket_page_id, AccessType::Lookup)?;
        Ok(bucket_guard.as_bucket().lookup(key))
    }

    /// Inserts a `(key, record)` pair. `Ok(false)` when the exact pair is
    /// already present.
    pub fn insert(
        &self,
        txn: &Transaction,
        key: Key,
        record: RecordId,
    ) -> Result<bool, HashTableError> {
        {
            let _table = self.table_latch.read().unwrap();
            let dir_guard = self
                .pool
                .fetch_page_read(self.directory_page_id, AccessType::Index)?;
            let dir = dir_guard.as_directory();
            let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
            let bucket_page_id = dir.bucket_page_id(idx);

            let mut bucket_guard = self.pool.fetch_page_write(bucket_page_id, AccessType::Index)?;
            match bucket_guard.as_bucket_mut().insert(key, record) {
                Ok(()) => return Ok(true),
                Err(HashBucketError::Duplicate) => return Ok(false),
                Err(HashBucketError::Full) => {}
            }
        }
        // full bucket: escalate to a structural change
        self.split_insert(txn, key, record)
    }

    /// Split path of `insert`, under the exclusive table latch.
    ///
    /// Re-resolves the target, splits it while it stays full (growing the
    /// directory whenever the bucket already discriminates on every indexed
    /// bit) and retries the insert. Entries whose hash carries the new high
    /// bit move to the split image; their old slots stay occupied but stop
    /// being readable.
    fn split_insert(
        &self,
        _txn: &Transaction,
        key: Key,
        record: RecordId,
    ) -> Result<bool, HashTableError> {
        let _table = self.table_latch.write().unwrap();
        loop {
            let mut dir_guard = self
                .pool
                .fetch_page_write(self.directory_page_id, AccessType::Index)?;
            let (bucket_page_id, local_depth, global_depth) = {
                let dir = dir_guard.as_directory();
                let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
                (
                    dir.bucket_page_id(idx),
                    dir.local_depth(idx),
                    dir.global_depth(),
                )
            };

            let mut bucket_guard = self.pool.fetch_page_write(bucket_page_id, AccessType::Index)?;
            match bucket_guard.as_bucket_mut().insert(key, record) {
                Ok(()) => return Ok(true),
                Err(HashBucketError::Duplicate) => return Ok(false),
                Err(HashBucketError::Full) => {}
            }

            if local_depth == DIRECTORY_MAX_DEPTH {
                return Err(HashTableError::DepthExhausted);
            }
            if local_depth == global_depth {
                dir_guard.as_directory_mut().incr_global_depth()?;
            }

            let mut new_bucket_guard = self.pool.new_page(AccessType::Index)?.into_write();
            let new_bucket_page_id = new_bucket_guard.page_id();
            let high_bit = 1u32 << local_depth;

            {
                let dir = dir_guard.as_directory_mut();
                for i in 0..dir.size() {
                    if dir.bucket_page_id(i) == bucket_page_id {
                        dir.set_local_depth(i, local_depth + 1);
                        if (i as u32) & high_bit != 0 {
                            dir.set_bucket_page_id(i, new_bucket_page_id);
                        }
                    }
                }
            }

            let old_bucket = bucket_guard.as_bucket_mut();
            let new_bucket = new_bucket_guard.as_bucket_mut();
            for slot in 0..BUCKET_CAPACITY {
                if old_bucket.is_readable(slot)
                    && self.hash(old_bucket.key_at(slot)) & high_bit != 0
                {
                    new_bucket
                        .insert(old_bucket.key_at(slot), old_bucket.record_at(slot))
                        .expect("split image cannot overflow");
                    old_bucket.remove_at(slot);
                }
            }
            debug!(
                "split bucket {bucket_page_id} into {new_bucket_page_id} at depth {}",
                local_depth + 1
            );
        }
    }

    /// Removes the exact `(key, record)` pair. `Ok(false)` when absent. A
    /// bucket emptied by the removal is folded into its split image.
    pub fn remove(
        &self,
        txn: &Transaction,
        key: Key,
        record: RecordId,
    ) -> Result<bool, HashTableError> {
        let removed;
        let became_empty;
        {
            let _table = self.table_latch.read().unwrap();
            let dir_guard = self
                .pool
                .fetch_page_read(self.directory_page_id, AccessType::Index)?;
            let dir = dir_guard.as_directory();
            let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
            let bucket_page_id = dir.bucket_page_id(idx);

            let mut bucket_guard = self.pool.fetch_page_write(bucket_page_id, AccessType::Index)?;
            removed = bucket_guard.as_bucket_mut().remove(key, record);
            became_empty = removed && bucket_guard.as_bucket().is_empty();
        }

        if became_empty {
            self.merge(txn, key)?;
        }
        Ok(removed)
    }

    /// Folds the (now empty) bucket serving `key` into its split image, as
    /// long as both discriminate on the same bits, shrinking the directory
    /// whenever no bucket uses its top bit. Cascades while the surviving
    /// bucket is empty too.
    fn merge(&self, _txn: &Transaction, key: Key) -> Result<(), HashTableError> {
        let _table = self.table_latch.write().unwrap();
        loop {
            let mut dir_guard = self
                .pool
                .fetch_page_write(self.directory_page_id, AccessType::Index)?;
            let (bucket_page_id, sibling_page_id, local_depth) = {
                let dir = dir_guard.as_directory();
                let idx = (self.hash(key) & dir.global_depth_mask()) as usize;
                if dir.local_depth(idx) == 0 {
                    return Ok(());
                }
                let sibling_idx = dir.split_image_index(idx);
                if dir.local_depth(sibling_idx) != dir.local_depth(idx) {
                    return Ok(());
                }
                (
                    dir.bucket_page_id(idx),
                    dir.bucket_page_id(sibling_idx),
                    dir.local_depth(idx),
                )
            };
            if sibling_page_id == bucket_page_id {
                return Ok(());
            }

            {
                // somebody may have refilled the bucket before we took the
                // exclusive latch
                let bucket_guard = self.pool.fetch_page_read(bucket_page_id, AccessType::Index)?;
                if !bucket_guard.as_bucket().is_empty() {
                    return Ok(());
                }
            }

            {
                let dir = dir_guard.as_directory_mut();
                for i in 0..dir.size() {
                    if dir.bucket_page_id(i) == bucket_page_id {
                        dir.set_bucket_page_id(i, sibling_page_id);
                    }
                    if dir.bucket_page_id(i) == sibling_page_id {
                        dir.set_local_depth(i, local_depth - 1);
                    }
                }
                while dir.can_shrink() {
                    dir.decr_global_depth();
                }
            }
            drop(dir_guard);

            if !self.pool.delete_page(bucket_page_id)? {
                warn!("freed bucket {bucket_page_id} still pinned, leaking it");
            }
            debug!("merged bucket {bucket_page_id} into {sibling_page_id}");

            let survivor_empty = {
                let guard = self.pool.fetch_page_read(sibling_page_id, AccessType::Index)?;
                guard.as_bucket().is_empty()
            };
            if !survivor_empty {
                return Ok(());
            }
        }
    }

    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _table = self.table_latch.read().unwrap();
        let dir_guard = self
            .pool
            .fetch_page_read(self.directory_page_id, AccessType::Lookup)?;
        Ok(dir_guard.as_directory().global_depth())
    }

    /// Checks the directory invariants.
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _table = self.table_latch.read().unwrap();
        let dir_guard = self
            .pool
            .fetch_page_read(self.directory_page_id, AccessType::Lookup)?;
        dir_guard.as_directory().verify_integrity()?;
        Ok(())
    }
}
