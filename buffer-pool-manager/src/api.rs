//! Common identifiers, constants and the error type shared across the crate.

use thiserror::Error;

/// A unique identifier for a page in the database.
pub type PageId = u32;

/// An index into the buffer pool's frame array.
pub type FrameId = usize;

/// Sentinel for a slot that does not reference any page.
pub const INVALID_PAGE_ID: PageId = PageId::MAX;

/// The size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// The kind of access being recorded against a frame.
///
/// `Scan` accesses are tracked by the replacer without contributing history
/// entries, so a sequential scan cannot flush the hot set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// A specialized error type for buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferPoolError {
    /// The pool has no free frame and no evictable frame.
    #[error("buffer pool exhausted: no free or evictable frames")]
    PoolExhausted,

    /// An operation was given `INVALID_PAGE_ID`.
    #[error("operation on the invalid page id")]
    InvalidPageId,

    /// An I/O error surfaced by the disk scheduler.
    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BufferPoolError>;
