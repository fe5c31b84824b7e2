//! Disk-resident extendible hash table.
//!
//! Three levels of pages rooted at a header: the header routes a hash's high
//! bits to a directory, the directory routes its low bits to a bucket, and
//! the bucket stores the entries. Buckets split when full (growing their
//! directory as needed) and merge with their split image when empty.
//!
//! Latching is crab style: a parent guard is released once the child's guard
//! is held, so readers of unrelated subtrees never contend.

use std::marker::PhantomData;
use std::sync::Arc;

use buffer_pool_manager::api::{PageId, Result, INVALID_PAGE_ID};
use buffer_pool_manager::buffer_pool::BufferPoolManager;
use buffer_pool_manager::page_guard::WritePageGuard;
use tracing::debug;

use crate::bucket_page::{bucket_array_capacity, BucketPage};
use crate::directory_page::{DirectoryPage, DIRECTORY_PAGE_MAX_DEPTH};
use crate::header_page::{HeaderPage, HEADER_PAGE_MAX_DEPTH};
use crate::key::{KeyComparator, KeyHasher, Storable};
use crate::Transaction;

enum InsertOutcome {
    Inserted,
    /// The key cannot be placed: a duplicate appeared concurrently, or the
    /// target bucket is full with both depths at their maximum.
    Rejected,
    /// A split happened; the caller retries from the header.
    Retry,
}

/// An extendible hash table keyed by fixed-width keys, backed by the buffer
/// pool. Keys are unique; inserting an existing key fails.
pub struct DiskExtendibleHashTable<K, V, C, H> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    cmp: C,
    hasher: H,
    directory_max_depth: u32,
    bucket_max_size: u32,
    header_page_id: PageId,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, H> DiskExtendibleHashTable<K, V, C, H>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a new hash table rooted at a freshly allocated header page.
    ///
    /// `bucket_max_size` defaults to however many entries fit a page for
    /// this key/value width.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        cmp: C,
        hasher: H,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: Option<u32>,
    ) -> Result<Self> {
        assert!(
            header_max_depth <= HEADER_PAGE_MAX_DEPTH,
            "header depth does not fit a page"
        );
        assert!(
            directory_max_depth <= DIRECTORY_PAGE_MAX_DEPTH,
            "directory depth does not fit a page"
        );
        let bucket_max_size =
            bucket_max_size.unwrap_or_else(|| bucket_array_capacity::<K, V>());
        assert!(
            bucket_max_size > 0 && bucket_max_size <= bucket_array_capacity::<K, V>(),
            "bucket size does not fit a page"
        );

        let header_page = bpm.new_page()?;
        let header_page_id = header_page.page_id();
        let mut header_guard = header_page.upgrade_write();
        HeaderPage::new(&mut header_guard[..]).init(header_max_depth);
        drop(header_guard);

        Ok(Self {
            index_name: index_name.into(),
            bpm,
            cmp,
            hasher,
            directory_max_depth,
            bucket_max_size,
            header_page_id,
            _marker: PhantomData,
        })
    }

    /// Reattaches to an existing table rooted at `header_page_id`. Depth
    /// limits and bucket capacity are configuration, not page state, so the
    /// caller supplies them again.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        cmp: C,
        hasher: H,
        header_page_id: PageId,
        directory_max_depth: u32,
        bucket_max_size: Option<u32>,
    ) -> Self {
        let bucket_max_size =
            bucket_max_size.unwrap_or_else(|| bucket_array_capacity::<K, V>());
        Self {
            index_name: index_name.into(),
            bpm,
            cmp,
            hasher,
            directory_max_depth,
            bucket_max_size,
            header_page_id,
            _marker: PhantomData,
        }
    }

    /// The page id of the table's header, for reopening or inspection.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Looks up `key`, pushing its value onto `result`. Returns whether the
    /// key was found.
    pub fn get_value(
        &self,
        key: &K,
        result: &mut Vec<V>,
        _transaction: Option<&Transaction>,
    ) -> Result<bool> {
        let hash = self.hasher.hash_key(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let directory_page_id = {
            let header = HeaderPage::new(&header_guard[..]);
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        drop(header_guard);
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let directory_guard = self.bpm.fetch_page_read(directory_page_id)?;
        let bucket_page_id = {
            let directory = DirectoryPage::new(&directory_guard[..]);
            directory.bucket_page_id(directory.hash_to_bucket_index(hash))
        };
        drop(directory_guard);
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let bucket_guard = self.bpm.fetch_page_read(bucket_page_id)?;
        let bucket = BucketPage::<K, V, _>::new(&bucket_guard[..]);
        match bucket.lookup(key, &self.cmp) {
            Some(value) => {
                result.push(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Inserts a key/value pair. Returns `false` for duplicate keys and for
    /// a table that is full at both depth limits.
    pub fn insert(&self, key: &K, value: &V, transaction: Option<&Transaction>) -> Result<bool> {
        let mut probe = Vec::new();
        if self.get_value(key, &mut probe, transaction)? {
            return Ok(false);
        }
        let hash = self.hasher.hash_key(key);
        loop {
            match self.insert_internal(hash, key, value)? {
                InsertOutcome::Inserted => return Ok(true),
                InsertOutcome::Rejected => return Ok(false),
                InsertOutcome::Retry => {}
            }
        }
    }

    /// Removes `key`. Empty buckets merge with their split image as long as
    /// the depths allow, then the directory shrinks as far as it can.
    pub fn remove(&self, key: &K, _transaction: Option<&Transaction>) -> Result<bool> {
        let hash = self.hasher.hash_key(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let directory_page_id = {
            let header = HeaderPage::new(&header_guard[..]);
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        drop(header_guard);
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let (bucket_idx, bucket_page_id) = {
            let directory = DirectoryPage::new(&directory_guard[..]);
            let idx = directory.hash_to_bucket_index(hash);
            (idx, directory.bucket_page_id(idx))
        };
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
        if !BucketPage::<K, V, _>::new(&mut bucket_guard[..]).remove(key, &self.cmp) {
            return Ok(false);
        }

        self.merge_empty_buckets(&mut directory_guard, bucket_guard, bucket_idx)?;
        Ok(true)
    }

    /// Walks header and directories, asserting the directory invariants.
    /// Panics on violation; meant for tests and debugging.
    pub fn verify_integrity(&self) -> Result<()> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let header = HeaderPage::new(&header_guard[..]);
        for directory_idx in 0..header.max_size() {
            let directory_page_id = header.directory_page_id(directory_idx);
            if directory_page_id == INVALID_PAGE_ID {
                continue;
            }
            let directory_guard = self.bpm.fetch_page_read(directory_page_id)?;
            DirectoryPage::new(&directory_guard[..]).verify_integrity();
        }
        Ok(())
    }

    fn insert_internal(&self, hash: u32, key: &K, value: &V) -> Result<InsertOutcome> {
        let mut header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let (directory_idx, directory_page_id) = {
            let header = HeaderPage::new(&header_guard[..]);
            let idx = header.hash_to_directory_index(hash);
            (idx, header.directory_page_id(idx))
        };
        if directory_page_id == INVALID_PAGE_ID {
            return self.insert_to_new_directory(&mut header_guard, directory_idx, hash, key, value);
        }
        drop(header_guard);

        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let (bucket_idx, bucket_page_id) = {
            let directory = DirectoryPage::new(&directory_guard[..]);
            let idx = directory.hash_to_bucket_index(hash);
            (idx, directory.bucket_page_id(idx))
        };
        if bucket_page_id == INVALID_PAGE_ID {
            let mut directory = DirectoryPage::new(&mut directory_guard[..]);
            return self.insert_to_new_bucket(&mut directory, bucket_idx, key, value);
        }

        let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
        {
            let mut bucket = BucketPage::<K, V, _>::new(&mut bucket_guard[..]);
            if !bucket.is_full() {
                return Ok(if bucket.insert(key, value, &self.cmp) {
                    InsertOutcome::Inserted
                } else {
                    InsertOutcome::Rejected
                });
            }
        }

        // The bucket is full. Make the two halves of its hash class
        // distinguishable, growing the directory when the bucket already
        // uses every global bit.
        let mut directory = DirectoryPage::new(&mut directory_guard[..]);
        if directory.local_depth(bucket_idx) == directory.global_depth() {
            if directory.global_depth() >= directory.max_depth() {
                return Ok(InsertOutcome::Rejected);
            }
            directory.incr_global_depth();
            debug!(
                "index {}: directory {directory_page_id} grew to global depth {}",
                self.index_name,
                directory.global_depth()
            );
        }
        let mut bucket = BucketPage::<K, V, _>::new(&mut bucket_guard[..]);
        self.split_bucket(&mut directory, &mut bucket, bucket_idx, bucket_page_id)?;
        Ok(InsertOutcome::Retry)
    }

    /// Allocates and installs a directory for a header slot that had none,
    /// then inserts through it.
    fn insert_to_new_directory(
        &self,
        header_guard: &mut WritePageGuard<'_>,
        directory_idx: u32,
        hash: u32,
        key: &K,
        value: &V,
    ) -> Result<InsertOutcome> {
        let directory_page = self.bpm.new_page()?;
        let directory_page_id = directory_page.page_id();
        let mut directory_guard = directory_page.upgrade_write();
        let mut directory = DirectoryPage::new(&mut directory_guard[..]);
        directory.init(self.directory_max_depth);
        HeaderPage::new(&mut header_guard[..]).set_directory_page_id(directory_idx, directory_page_id);
        debug!(
            "index {}: allocated directory page {directory_page_id} for header slot {directory_idx}",
            self.index_name
        );

        let bucket_idx = directory.hash_to_bucket_index(hash);
        self.insert_to_new_bucket(&mut directory, bucket_idx, key, value)
    }

    /// Allocates and installs a bucket for a directory slot that had none,
    /// then inserts into it.
    fn insert_to_new_bucket<B: AsRef<[u8]> + AsMut<[u8]>>(
        &self,
        directory: &mut DirectoryPage<B>,
        bucket_idx: u32,
        key: &K,
        value: &V,
    ) -> Result<InsertOutcome> {
        let bucket_page = self.bpm.new_page()?;
        let bucket_page_id = bucket_page.page_id();
        let mut bucket_guard = bucket_page.upgrade_write();
        let mut bucket = BucketPage::<K, V, _>::new(&mut bucket_guard[..]);
        bucket.init(self.bucket_max_size);
        directory.set_bucket_page_id(bucket_idx, bucket_page_id);

        Ok(if bucket.insert(key, value, &self.cmp) {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Rejected
        })
    }

    /// Splits `bucket` across itself and a fresh page. Every directory slot
    /// aliasing the bucket is retagged with the deeper local depth, slots on
    /// the split-image side are retargeted, and the entries are
    /// redistributed by their directory slot.
    fn split_bucket<BD, BB>(
        &self,
        directory: &mut DirectoryPage<BD>,
        bucket: &mut BucketPage<K, V, BB>,
        bucket_idx: u32,
        bucket_page_id: PageId,
    ) -> Result<()>
    where
        BD: AsRef<[u8]> + AsMut<[u8]>,
        BB: AsRef<[u8]> + AsMut<[u8]>,
    {
        let split_page = self.bpm.new_page()?;
        let split_page_id = split_page.page_id();
        let mut split_guard = split_page.upgrade_write();
        let mut split_bucket = BucketPage::<K, V, _>::new(&mut split_guard[..]);
        split_bucket.init(self.bucket_max_size);

        let new_local_depth = directory.local_depth(bucket_idx) + 1;
        let high_bit = 1u32 << (new_local_depth - 1);
        let split_side = (bucket_idx & high_bit) ^ high_bit;
        for idx in 0..directory.size() {
            if directory.bucket_page_id(idx) == bucket_page_id {
                directory.set_local_depth(idx, new_local_depth);
                if idx & high_bit == split_side {
                    directory.set_bucket_page_id(idx, split_page_id);
                }
            }
        }
        debug!(
            "index {}: split bucket page {bucket_page_id}, image {split_page_id}, local depth {new_local_depth}",
            self.index_name
        );

        let entries: Vec<(K, V)> = (0..bucket.size()).map(|idx| bucket.entry_at(idx)).collect();
        bucket.clear();
        for (key, value) in &entries {
            let target_idx = directory.hash_to_bucket_index(self.hasher.hash_key(key));
            let target_page_id = directory.bucket_page_id(target_idx);
            let inserted = if target_page_id == bucket_page_id {
                bucket.insert(key, value, &self.cmp)
            } else {
                split_bucket.insert(key, value, &self.cmp)
            };
            debug_assert!(inserted, "redistributed entry no longer fits its bucket");
        }
        Ok(())
    }

    /// The cascading merge loop that runs after a successful deletion. Each
    /// round collapses the current empty bucket into its split image; the
    /// image then becomes the subject. The directory shrinks once the loop
    /// settles.
    fn merge_empty_buckets<'a>(
        &'a self,
        directory_guard: &mut WritePageGuard<'a>,
        bucket_guard: WritePageGuard<'a>,
        bucket_idx: u32,
    ) -> Result<()> {
        let mut directory = DirectoryPage::new(&mut directory_guard[..]);
        let mut bucket_guard = bucket_guard;
        let mut bucket_idx = bucket_idx;

        loop {
            if !BucketPage::<K, V, _>::new(&bucket_guard[..]).is_empty() {
                break;
            }
            let local_depth = directory.local_depth(bucket_idx);
            if local_depth == 0 {
                break;
            }
            let merge_idx = directory.split_image_index(bucket_idx);
            // Buckets only merge with a split image at the same local depth.
            if directory.local_depth(merge_idx) != local_depth {
                break;
            }

            let empty_page_id = directory.bucket_page_id(bucket_idx);
            let merge_page_id = directory.bucket_page_id(merge_idx);
            let new_local_depth = local_depth - 1;
            let canonical = bucket_idx & ((1 << new_local_depth) - 1);
            let step = 1usize << new_local_depth;
            for idx in (canonical..directory.size()).step_by(step) {
                directory.set_bucket_page_id(idx, merge_page_id);
                directory.set_local_depth(idx, new_local_depth);
            }
            debug!(
                "index {}: merged empty bucket page {empty_page_id} into {merge_page_id} at local depth {new_local_depth}",
                self.index_name
            );

            drop(bucket_guard);
            self.bpm.delete_page(empty_page_id);

            bucket_idx = canonical;
            bucket_guard = self.bpm.fetch_page_write(merge_page_id)?;
        }
        drop(bucket_guard);

        while directory.can_shrink() {
            directory.decr_global_depth();
            debug!(
                "index {}: directory shrank to global depth {}",
                self.index_name,
                directory.global_depth()
            );
        }
        Ok(())
    }
}
