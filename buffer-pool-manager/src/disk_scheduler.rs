//! Schedules page reads and writes onto a background worker thread.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use tracing::warn;

use crate::api::PageId;
use crate::disk_manager::DiskManager;

/// How many requests may sit in the queue before `schedule` blocks.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// One-shot completion handle for a scheduled request.
pub type DiskSchedulerPromise = Sender<io::Result<()>>;

/// The receiving end of a [`DiskSchedulerPromise`].
pub type DiskSchedulerFuture = Receiver<io::Result<()>>;

/// A read or write request for the disk manager to execute.
///
/// The page buffer stays owned by the requester; the worker only locks it for
/// the duration of the transfer, then fulfills the promise.
pub struct DiskRequest {
    /// Whether the request writes the buffer out (`true`) or reads into it.
    pub is_write: bool,
    /// The page buffer, shared with the frame that issued the request.
    pub data: Arc<RwLock<Box<[u8]>>>,
    /// The page being read from / written to disk.
    pub page_id: PageId,
    /// Fulfilled exactly once when the request completes.
    pub callback: DiskSchedulerPromise,
}

/// Serializes page I/O onto a single background worker.
///
/// Requests are processed strictly in enqueue order, so two requests against
/// the same page complete in submission order. Construction spawns the
/// worker; dropping the scheduler enqueues a shutdown sentinel, lets the
/// worker drain the queue, and joins it. No request is ever dropped.
pub struct DiskScheduler {
    request_queue: SyncSender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (request_queue, receiver) = mpsc::sync_channel(REQUEST_QUEUE_CAPACITY);
        let worker = thread::spawn(move || Self::worker_loop(disk_manager, receiver));
        Self {
            request_queue,
            worker: Some(worker),
        }
    }

    /// Enqueues a request for the background worker to execute.
    pub fn schedule(&self, request: DiskRequest) {
        // The worker only exits after receiving the shutdown sentinel from
        // our Drop, so the channel cannot be closed here.
        self.request_queue
            .send(Some(request))
            .expect("disk scheduler worker exited while scheduler is alive");
    }

    /// Creates a promise/future pair for a request's completion signal.
    pub fn create_promise() -> (DiskSchedulerPromise, DiskSchedulerFuture) {
        mpsc::channel()
    }

    fn worker_loop(disk_manager: Arc<DiskManager>, receiver: mpsc::Receiver<Option<DiskRequest>>) {
        while let Ok(Some(request)) = receiver.recv() {
            let result = if request.is_write {
                let data = request.data.read();
                disk_manager.write_page(request.page_id, &data)
            } else {
                let mut data = request.data.write();
                disk_manager.read_page(request.page_id, &mut data)
            };
            if let Err(err) = &result {
                warn!(
                    "disk {} failed for page {}: {err}",
                    if request.is_write { "write" } else { "read" },
                    request.page_id
                );
            }
            // The issuer may have abandoned its future; that is not an error.
            let _ = request.callback.send(result);
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.request_queue.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
