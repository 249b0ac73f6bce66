use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use thiserror::Error;

use crate::common::types::{PageId, PagePtr};
use crate::index::hash::page as view;
use crate::index::hash::page::MAX_GLOBAL_DEPTH;
use crate::index::key::{hash_key, Storable};
use crate::storage::buffer::{BufferPool, BufferPoolError};

#[derive(Error, Debug)]
pub enum HashIndexError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}

/// Persistent extendible hash table over buffer-pool pages.
///
/// One directory page maps the low `global_depth` bits of a key's hash to a
/// bucket page. The table latch serializes directory mutations; bucket
/// mutations take the bucket's page latch. Duplicate keys are allowed,
/// duplicate `(key, value)` pairs are not.
pub struct ExtendibleHashIndex<K, V> {
    buffer_pool: Arc<dyn BufferPool>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> ExtendibleHashIndex<K, V>
where
    K: Storable,
    V: Storable,
{
    /// Create an empty table: a directory of depth 0 pointing at one bucket
    pub fn new(buffer_pool: Arc<dyn BufferPool>) -> Result<Self, HashIndexError> {
        let (dir_ptr, directory_page_id) = buffer_pool.new_page()?;
        let (_bucket_ptr, bucket_page_id) = buffer_pool.new_page()?;
        {
            let mut dir = dir_ptr.write();
            view::dir_init(&mut dir, directory_page_id);
            view::dir_set_bucket_page_id(&mut dir, 0, bucket_page_id);
            view::dir_set_local_depth(&mut dir, 0, 0);
        }
        buffer_pool.unpin_page(directory_page_id, true)?;
        buffer_pool.unpin_page(bucket_page_id, true)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            _phantom: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Number of slots a bucket page holds for this key/value shape
    pub fn bucket_capacity() -> usize {
        view::bucket_capacity::<K, V>()
    }

    fn fetch_directory(&self) -> Result<PagePtr, HashIndexError> {
        Ok(self.buffer_pool.fetch_page(self.directory_page_id)?)
    }

    /// Every value stored under `key`
    pub fn get(&self, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _table = self.table_latch.read();
        let dir_ptr = self.fetch_directory()?;
        let bucket_page_id = {
            let dir = dir_ptr.read();
            let dir_index = (hash_key(key) & view::dir_global_depth_mask(&dir)) as usize;
            view::dir_bucket_page_id(&dir, dir_index)
        };

        let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
        let result = {
            let bucket = bucket_ptr.read();
            view::bucket_get_value::<K, V>(&bucket, key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(result)
    }

    /// Insert a pair; returns `false` when the exact pair already exists.
    /// A full bucket triggers a split and the insert retries.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.read();
            let dir_ptr = self.fetch_directory()?;
            let bucket_page_id = {
                let dir = dir_ptr.read();
                let dir_index = (hash_key(key) & view::dir_global_depth_mask(&dir)) as usize;
                view::dir_bucket_page_id(&dir, dir_index)
            };

            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut bucket = bucket_ptr.write();
            if !view::bucket_is_full::<K, V>(&bucket) {
                let inserted = view::bucket_insert::<K, V>(&mut bucket, key, value);
                drop(bucket);
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(inserted);
            }

            // Full: release everything and take the split path
            drop(bucket);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        }
        self.split_insert(key, value)
    }

    /// Split the key's bucket under the table write latch, then retry the
    /// insert. Doubles the directory when the bucket's local depth equals
    /// the global depth.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.write();
            let dir_ptr = self.fetch_directory()?;
            let mut dir = dir_ptr.write();
            let dir_index = (hash_key(key) & view::dir_global_depth_mask(&dir)) as usize;
            let bucket_page_id = view::dir_bucket_page_id(&dir, dir_index);
            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;

            // Another thread may have split this bucket while we waited
            let still_full = {
                let bucket = bucket_ptr.read();
                view::bucket_is_full::<K, V>(&bucket)
            };
            if !still_full {
                drop(dir);
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            } else {
                let local_depth = view::dir_local_depth(&dir, dir_index) as u32;
                if local_depth >= MAX_GLOBAL_DEPTH {
                    warn!(
                        "cannot split bucket {}: local depth {} at the directory limit",
                        bucket_page_id, local_depth
                    );
                    drop(dir);
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                    return Ok(false);
                }

                let (new_ptr, new_page_id) = self.buffer_pool.new_page()?;

                if local_depth == view::dir_global_depth(&dir) {
                    // Double the directory: the upper half mirrors the lower
                    for i in 0..view::dir_size(&dir) {
                        let mirror = i | (1 << view::dir_global_depth(&dir));
                        let page_id = view::dir_bucket_page_id(&dir, i);
                        view::dir_set_bucket_page_id(&mut dir, mirror, page_id);
                        let depth = view::dir_local_depth(&dir, i);
                        view::dir_set_local_depth(&mut dir, mirror, depth);
                    }
                    view::dir_incr_global_depth(&mut dir);
                }

                // Every entry still pointing at the full bucket deepens; the
                // ones whose new high bit is set move to the fresh bucket
                for i in 0..view::dir_size(&dir) {
                    if view::dir_bucket_page_id(&dir, i) != bucket_page_id {
                        continue;
                    }
                    view::dir_incr_local_depth(&mut dir, i);
                    if i as u32 & view::dir_local_high_bit(&dir, i) != 0 {
                        view::dir_set_bucket_page_id(&mut dir, i, new_page_id);
                    }
                }

                // Rehash the old bucket's pairs across the two buckets
                {
                    let mut old_bucket = bucket_ptr.write();
                    let mut new_bucket = new_ptr.write();
                    for (k, v) in view::bucket_readable_entries::<K, V>(&old_bucket) {
                        let index = (hash_key(&k) & view::dir_global_depth_mask(&dir)) as usize;
                        if index as u32 & view::dir_local_high_bit(&dir, index) != 0 {
                            view::bucket_insert::<K, V>(&mut new_bucket, &k, &v);
                            view::bucket_remove::<K, V>(&mut old_bucket, &k, &v);
                        }
                    }
                }

                debug!(
                    "split bucket {} into {}, global depth now {}",
                    bucket_page_id,
                    new_page_id,
                    view::dir_global_depth(&dir)
                );
                drop(dir);
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                self.buffer_pool.unpin_page(new_page_id, true)?;
                self.buffer_pool.unpin_page(self.directory_page_id, true)?;
            }
        }
        self.insert(key, value)
    }

    /// Remove the exact `(key, value)` pair. Emptying a bucket triggers a
    /// merge with its split image.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let (removed, became_empty) = {
            let _table = self.table_latch.read();
            let dir_ptr = self.fetch_directory()?;
            let bucket_page_id = {
                let dir = dir_ptr.read();
                let dir_index = (hash_key(key) & view::dir_global_depth_mask(&dir)) as usize;
                view::dir_bucket_page_id(&dir, dir_index)
            };

            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut bucket = bucket_ptr.write();
            let removed = view::bucket_remove::<K, V>(&mut bucket, key, value);
            let became_empty = removed && view::bucket_is_empty::<K, V>(&bucket);
            drop(bucket);
            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            (removed, became_empty)
        };

        if became_empty {
            self.merge(key, value)?;
        }
        Ok(removed)
    }

    /// Fold an empty bucket into its split image, shrink the directory while
    /// possible, and recurse when the split image is itself empty.
    fn merge(&self, key: &K, value: &V) -> Result<(), HashIndexError> {
        let recurse = {
            let _table = self.table_latch.write();
            let dir_ptr = self.fetch_directory()?;
            let mut dir = dir_ptr.write();
            let dir_index = (hash_key(key) & view::dir_global_depth_mask(&dir)) as usize;
            let bucket_page_id = view::dir_bucket_page_id(&dir, dir_index);
            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;

            // Re-check: a concurrent insert may have refilled the bucket
            let is_empty = {
                let bucket = bucket_ptr.read();
                view::bucket_is_empty::<K, V>(&bucket)
            };
            if !is_empty || view::dir_local_depth(&dir, dir_index) == 0 {
                drop(dir);
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(());
            }

            // A merge needs some referencing entry whose split image sits at
            // the same local depth
            let mut split_index = None;
            for i in 0..view::dir_size(&dir) {
                if view::dir_bucket_page_id(&dir, i) != bucket_page_id {
                    continue;
                }
                let image = view::dir_split_image_index(&dir, i);
                if view::dir_local_depth(&dir, i) == view::dir_local_depth(&dir, image) {
                    split_index = Some(image);
                    break;
                }
            }
            let split_index = match split_index {
                Some(index) => index,
                None => {
                    drop(dir);
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    self.buffer_pool.unpin_page(self.directory_page_id, true)?;
                    return Ok(());
                }
            };

            let local_depth = view::dir_local_depth(&dir, dir_index);
            let split_page_id = view::dir_bucket_page_id(&dir, split_index);

            // Repoint every reference to the empty bucket at the split page
            // and walk the depths down
            for i in 0..view::dir_size(&dir) {
                if view::dir_bucket_page_id(&dir, i) != bucket_page_id {
                    continue;
                }
                view::dir_set_bucket_page_id(&mut dir, i, split_page_id);
                let image = view::dir_split_image_index(&dir, i);
                if view::dir_local_depth(&dir, image) == local_depth {
                    view::dir_decr_local_depth(&mut dir, image);
                }
                view::dir_decr_local_depth(&mut dir, i);
            }

            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.delete_page(bucket_page_id)?;

            while view::dir_can_shrink(&dir) {
                view::dir_decr_global_depth(&mut dir);
            }

            let split_empty = {
                let split_ptr = self.buffer_pool.fetch_page(split_page_id)?;
                let empty = {
                    let split_bucket = split_ptr.read();
                    view::bucket_is_empty::<K, V>(&split_bucket)
                };
                self.buffer_pool.unpin_page(split_page_id, false)?;
                empty
            };

            debug!(
                "merged bucket {} into {}, global depth now {}",
                bucket_page_id,
                split_page_id,
                view::dir_global_depth(&dir)
            );
            drop(dir);
            self.buffer_pool.unpin_page(self.directory_page_id, true)?;
            split_empty
        };

        if recurse {
            self.merge(key, value)?;
        }
        Ok(())
    }

    /// Current global depth of the directory
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _table = self.table_latch.read();
        let dir_ptr = self.fetch_directory()?;
        let depth = {
            let dir = dir_ptr.read();
            view::dir_global_depth(&dir)
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Local depth of the directory entry at `index`
    pub fn local_depth(&self, index: usize) -> Result<u8, HashIndexError> {
        let _table = self.table_latch.read();
        let dir_ptr = self.fetch_directory()?;
        let depth = {
            let dir = dir_ptr.read();
            view::dir_local_depth(&dir, index)
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Directory slot a key currently resolves to
    pub fn directory_index(&self, key: &K) -> Result<usize, HashIndexError> {
        let _table = self.table_latch.read();
        let dir_ptr = self.fetch_directory()?;
        let index = {
            let dir = dir_ptr.read();
            (hash_key(key) & view::dir_global_depth_mask(&dir)) as usize
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(index)
    }

    /// Assert the directory invariants; panics on violation
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _table = self.table_latch.read();
        let dir_ptr = self.fetch_directory()?;
        {
            let dir = dir_ptr.read();
            view::dir_verify_integrity(&dir);
        }
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(())
    }
}
