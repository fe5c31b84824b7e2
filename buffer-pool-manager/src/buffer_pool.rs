//! The buffer pool manager.
//!
//! Owns a fixed array of frames and moves pages between memory and disk,
//! coordinating the LRU-K replacer (victim selection) and the disk scheduler
//! (actual I/O). Every public operation is atomic under one coarse mutex;
//! operations may block on an I/O future while holding it.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::api::{
    AccessType, BufferPoolError, FrameId, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::disk_manager::DiskManager;
use crate::disk_scheduler::{DiskRequest, DiskScheduler, DiskSchedulerFuture};
use crate::lru_k_replacer::LruKReplacer;
use crate::page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};

/// A frame's page bytes, shared with the scheduler and with page guards.
/// The `RwLock` doubles as the page latch.
pub(crate) type FrameData = Arc<RwLock<Box<[u8]>>>;

/// One slot of the buffer pool. Metadata is only touched under the pool
/// mutex; the bytes are only written under the page latch (or by the
/// scheduler while the pool mutex pins the frame down).
struct Frame {
    page_id: PageId,
    pin_count: usize,
    is_dirty: bool,
    data: FrameData,
}

impl Frame {
    fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
            data: Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
        }
    }
}

struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// The main buffer pool manager.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Mutex<PoolState>,
    /// Keeps its own mutex; the pool only calls it under the pool mutex.
    replacer: LruKReplacer,
    disk_scheduler: DiskScheduler,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>, replacer_k: usize) -> Self {
        assert!(pool_size > 0, "pool size must be positive");
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list = (0..pool_size).collect();
        Self {
            pool_size,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                next_page_id: 0,
            }),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            disk_scheduler: DiskScheduler::new(Arc::clone(&disk_manager)),
            disk_manager,
        }
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocates a fresh page and pins it into a frame, evicting if the free
    /// list is empty. The page starts zeroed and clean.
    pub fn new_page(&self) -> Result<BasicPageGuard<'_>> {
        let mut state = self.state.lock();
        let page_id = state.next_page_id;
        state.next_page_id += 1;

        let frame_id = self.take_frame(&mut state)?;
        let frame = &mut state.frames[frame_id];
        frame.data.write().fill(0);
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let data = Arc::clone(&frame.data);
        state.page_table.insert(page_id, frame_id);
        self.replacer.set_evictable(frame_id, false);
        self.replacer.record_access(frame_id, AccessType::Unknown);

        Ok(BasicPageGuard::new(self, page_id, data))
    }

    /// Pins `page_id` into a frame, reading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId, access_type: AccessType) -> Result<BasicPageGuard<'_>> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &mut state.frames[frame_id];
            frame.pin_count += 1;
            let data = Arc::clone(&frame.data);
            self.replacer.record_access(frame_id, access_type);
            self.replacer.set_evictable(frame_id, false);
            return Ok(BasicPageGuard::new(self, page_id, data));
        }

        let frame_id = self.take_frame(&mut state)?;
        if let Err(err) = self.schedule_read(page_id, &state.frames[frame_id].data) {
            // The frame holds garbage now; hand it back rather than leaving
            // it mapped under a valid page id.
            state.free_list.push_back(frame_id);
            return Err(err);
        }

        let frame = &mut state.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let data = Arc::clone(&frame.data);
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id, access_type);
        self.replacer.set_evictable(frame_id, false);

        Ok(BasicPageGuard::new(self, page_id, data))
    }

    /// Fetches a page and takes its shared latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        Ok(self.fetch_page(page_id, AccessType::Lookup)?.upgrade_read())
    }

    /// Fetches a page and takes its exclusive latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        Ok(self.fetch_page(page_id, AccessType::Lookup)?.upgrade_write())
    }

    /// Drops one pin on `page_id`, OR-merging `is_dirty` into the frame's
    /// dirty flag (dirty is sticky for the rest of the residency). Returns
    /// `false` if the page is not resident or its pin count is already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool, _access_type: AccessType) -> bool {
        if page_id == INVALID_PAGE_ID {
            return false;
        }
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &mut state.frames[frame_id];
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            return false;
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes `page_id` back to disk regardless of its pin count and clears
    /// the dirty flag. Returns `Ok(false)` if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let data = Arc::clone(&state.frames[frame_id].data);
        self.schedule_write(page_id, &data)?;
        state.frames[frame_id].is_dirty = false;
        Ok(true)
    }

    /// Writes every resident page back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut state = self.state.lock();
        for frame_id in 0..self.pool_size {
            let (page_id, data) = {
                let frame = &state.frames[frame_id];
                if frame.page_id == INVALID_PAGE_ID {
                    continue;
                }
                (frame.page_id, Arc::clone(&frame.data))
            };
            self.schedule_write(page_id, &data)?;
            state.frames[frame_id].is_dirty = false;
        }
        Ok(())
    }

    /// Removes `page_id` from the pool and returns its frame to the free
    /// list. Returns `false` while the page is pinned; deleting an absent
    /// page succeeds (the operation is idempotent).
    pub fn delete_page(&self, page_id: PageId) -> bool {
        if page_id == INVALID_PAGE_ID {
            return true;
        }
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if state.frames[frame_id].pin_count > 0 {
                return false;
            }
            state.page_table.remove(&page_id);
            self.replacer.remove(frame_id);
            let frame = &mut state.frames[frame_id];
            frame.data.write().fill(0);
            frame.page_id = INVALID_PAGE_ID;
            frame.pin_count = 0;
            frame.is_dirty = false;
            state.free_list.push_back(frame_id);
        }
        self.disk_manager.deallocate_page(page_id);
        true
    }

    /// Finds a frame to load a page into: the free list first, then the
    /// replacer. A dirty victim is written back before the frame is reused.
    fn take_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }
        let Some(frame_id) = self.replacer.evict() else {
            return Err(BufferPoolError::PoolExhausted);
        };
        let frame = &mut state.frames[frame_id];
        if frame.is_dirty {
            debug!("writing back dirty page {} before reusing frame {frame_id}", frame.page_id);
            if let Err(err) = self.schedule_write(frame.page_id, &frame.data) {
                // The page is still intact in memory; put the frame back
                // under the replacer's control and report the failure.
                self.replacer.record_access(frame_id, AccessType::Unknown);
                self.replacer.set_evictable(frame_id, true);
                return Err(err);
            }
            frame.is_dirty = false;
        }
        state.page_table.remove(&frame.page_id);
        frame.page_id = INVALID_PAGE_ID;
        Ok(frame_id)
    }

    fn schedule_write(&self, page_id: PageId, data: &FrameData) -> Result<()> {
        let (promise, future) = DiskScheduler::create_promise();
        self.disk_scheduler.schedule(DiskRequest {
            is_write: true,
            data: Arc::clone(data),
            page_id,
            callback: promise,
        });
        wait_for(future)
    }

    fn schedule_read(&self, page_id: PageId, data: &FrameData) -> Result<()> {
        let (promise, future) = DiskScheduler::create_promise();
        self.disk_scheduler.schedule(DiskRequest {
            is_write: false,
            data: Arc::clone(data),
            page_id,
            callback: promise,
        });
        wait_for(future)
    }
}

/// Blocks on a scheduler future and flattens the two failure layers.
fn wait_for(future: DiskSchedulerFuture) -> Result<()> {
    let result = future.recv().map_err(|_| {
        io::Error::new(
            io::ErrorKind::BrokenPipe,
            "disk scheduler worker exited before completing the request",
        )
    })?;
    result?;
    Ok(())
}
