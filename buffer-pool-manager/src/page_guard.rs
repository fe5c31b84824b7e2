//! Scoped page guards.
//!
//! A guard owns exactly one unit of pin on its page; dropping it unpins.
//! Read and write guards additionally own the page's shared or exclusive
//! latch. Destruction never performs I/O; a dirty write guard only marks the
//! frame so the write happens on eviction or flush.

use std::ops::{Deref, DerefMut};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::api::{AccessType, PageId};
use crate::buffer_pool::{BufferPoolManager, FrameData};

/// A pinned page without a latch. Can be upgraded into a read or write
/// guard; the upgrade keeps the pin alive across the latch acquisition.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    data: FrameData,
    is_dirty: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, page_id: PageId, data: FrameData) -> Self {
        Self {
            bpm,
            page_id,
            data,
            is_dirty: false,
        }
    }

    /// The id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Takes the page's shared latch.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        ReadPageGuard {
            latch: self.data.read_arc(),
            base: self,
        }
    }

    /// Takes the page's exclusive latch.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        WritePageGuard {
            latch: self.data.write_arc(),
            base: self,
        }
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.bpm
            .unpin_page(self.page_id, self.is_dirty, AccessType::Unknown);
    }
}

/// A pinned page held under its shared latch.
pub struct ReadPageGuard<'a> {
    // Field order is load-bearing: the latch must be released before the
    // base guard drops the pin.
    latch: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
    base: BasicPageGuard<'a>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.latch
    }
}

/// A pinned page held under its exclusive latch. Any mutable access marks
/// the frame dirty when the guard drops.
pub struct WritePageGuard<'a> {
    // Same drop-order requirement as ReadPageGuard.
    latch: ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>,
    base: BasicPageGuard<'a>,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.latch
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.latch
    }
}
