//! Directory page of the extendible hash table.
//!
//! Memory layout:
//! - Bytes 0-3: max_depth (u32, little-endian), immutable after init
//! - Bytes 4-7: global_depth (u32, little-endian)
//! - Bytes 8-519: local_depths, one u8 per slot (512 slots)
//! - Bytes 520-2567: bucket_page_ids, one `PageId` per slot
//!
//! A directory routes a hash by its low `global_depth` bits. Only the first
//! `2^global_depth` slots are live; growth mirrors them into the next run of
//! slots, so every alias of a bucket agrees on page id and local depth.

use buffer_pool_manager::api::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

const MAX_DEPTH_OFFSET: usize = 0;
const GLOBAL_DEPTH_OFFSET: usize = 4;
const LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// Largest `max_depth` whose arrays still fit in one page.
pub const DIRECTORY_PAGE_MAX_DEPTH: u32 = 9;

/// Slot-array capacity implied by [`DIRECTORY_PAGE_MAX_DEPTH`].
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_PAGE_MAX_DEPTH;

/// A typed view over a directory page's bytes.
pub struct DirectoryPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> DirectoryPage<B> {
    pub fn new(data: B) -> Self {
        assert!(data.as_ref().len() >= PAGE_SIZE, "buffer too small for a directory page");
        Self { data }
    }

    pub fn max_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.data.as_ref()[MAX_DEPTH_OFFSET..MAX_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn global_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.data.as_ref()[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Number of live slots, `2^global_depth`.
    pub fn size(&self) -> u32 {
        1 << self.global_depth()
    }

    /// Slot capacity, `2^max_depth`.
    pub fn max_size(&self) -> u32 {
        1 << self.max_depth()
    }

    /// Routes a hash to a bucket slot using its low `global_depth` bits.
    pub fn hash_to_bucket_index(&self, hash: u32) -> u32 {
        hash & (self.size() - 1)
    }

    pub fn bucket_page_id(&self, bucket_idx: u32) -> PageId {
        assert!(bucket_idx < self.max_size(), "bucket index out of range");
        let offset = BUCKET_PAGE_IDS_OFFSET + bucket_idx as usize * 4;
        PageId::from_le_bytes(self.data.as_ref()[offset..offset + 4].try_into().unwrap())
    }

    pub fn local_depth(&self, bucket_idx: u32) -> u32 {
        assert!(bucket_idx < self.max_size(), "bucket index out of range");
        self.data.as_ref()[LOCAL_DEPTHS_OFFSET + bucket_idx as usize] as u32
    }

    /// The slot that differs from `bucket_idx` only in the top bit of its
    /// local depth. Undefined for local depth zero (the sole bucket of the
    /// directory has no split image).
    pub fn split_image_index(&self, bucket_idx: u32) -> u32 {
        let local_depth = self.local_depth(bucket_idx);
        debug_assert!(local_depth > 0, "local depth zero has no split image");
        bucket_idx ^ (1 << (local_depth - 1))
    }

    /// A directory may halve when no slot uses its full global depth.
    pub fn can_shrink(&self) -> bool {
        if self.global_depth() == 0 {
            return false;
        }
        (0..self.size()).all(|idx| self.local_depth(idx) < self.global_depth())
    }

    /// Checks the directory invariants:
    /// - local depth never exceeds global depth, which never exceeds max
    /// - slots that agree modulo `2^local_depth` share page id and depth
    /// - each bucket is referenced by exactly `2^(global - local)` slots
    ///
    /// Panics on violation; meant for tests and debugging walks.
    pub fn verify_integrity(&self) {
        let global_depth = self.global_depth();
        assert!(global_depth <= self.max_depth());
        let mut reference_counts = std::collections::HashMap::new();
        for idx in 0..self.size() {
            let local_depth = self.local_depth(idx);
            assert!(
                local_depth <= global_depth,
                "local depth {local_depth} at slot {idx} exceeds global depth {global_depth}"
            );
            let page_id = self.bucket_page_id(idx);
            let canonical = idx & ((1 << local_depth) - 1);
            assert_eq!(
                page_id,
                self.bucket_page_id(canonical),
                "slot {idx} disagrees with its canonical alias {canonical}"
            );
            assert_eq!(
                local_depth,
                self.local_depth(canonical),
                "slot {idx} local depth disagrees with canonical alias {canonical}"
            );
            *reference_counts.entry((page_id, local_depth)).or_insert(0u32) += 1;
        }
        for ((page_id, local_depth), count) in reference_counts {
            assert_eq!(
                count,
                1 << (global_depth - local_depth),
                "bucket {page_id} has the wrong number of directory references"
            );
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DirectoryPage<B> {
    /// Initializes an empty directory: global depth zero, its single slot
    /// invalid. The whole slot array is cleared so growth always reveals
    /// well-defined values.
    pub fn init(&mut self, max_depth: u32) {
        assert!(
            max_depth <= DIRECTORY_PAGE_MAX_DEPTH,
            "directory max_depth {max_depth} exceeds page capacity"
        );
        self.data.as_mut()[MAX_DEPTH_OFFSET..MAX_DEPTH_OFFSET + 4]
            .copy_from_slice(&max_depth.to_le_bytes());
        self.set_global_depth(0);
        let data = self.data.as_mut();
        data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE].fill(0);
        for idx in 0..DIRECTORY_ARRAY_SIZE {
            let offset = BUCKET_PAGE_IDS_OFFSET + idx * 4;
            data[offset..offset + 4].copy_from_slice(&INVALID_PAGE_ID.to_le_bytes());
        }
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: u32, page_id: PageId) {
        assert!(bucket_idx < self.max_size(), "bucket index out of range");
        let offset = BUCKET_PAGE_IDS_OFFSET + bucket_idx as usize * 4;
        self.data.as_mut()[offset..offset + 4].copy_from_slice(&page_id.to_le_bytes());
    }

    pub fn set_local_depth(&mut self, bucket_idx: u32, local_depth: u32) {
        assert!(bucket_idx < self.max_size(), "bucket index out of range");
        assert!(local_depth <= u8::MAX as u32);
        self.data.as_mut()[LOCAL_DEPTHS_OFFSET + bucket_idx as usize] = local_depth as u8;
    }

    /// Doubles the directory: the live half of each array is mirrored into
    /// the newly revealed half, so every new slot starts as an alias of its
    /// image with the top bit cleared.
    pub fn incr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        assert!(global_depth < self.max_depth(), "directory is at max depth");
        let half = 1u32 << global_depth;
        for idx in 0..half {
            let page_id = self.bucket_page_id(idx);
            let local_depth = self.local_depth(idx);
            self.set_bucket_page_id(half + idx, page_id);
            self.set_local_depth(half + idx, local_depth);
        }
        self.set_global_depth(global_depth + 1);
    }

    pub fn decr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        assert!(global_depth > 0, "directory is already at depth zero");
        self.set_global_depth(global_depth - 1);
    }

    fn set_global_depth(&mut self, global_depth: u32) {
        self.data.as_mut()[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&global_depth.to_le_bytes());
    }
}
