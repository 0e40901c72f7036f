/*!
 * Shared Memory Types
 * Segment layout and limits
 */

use std::sync::atomic::{AtomicU32, AtomicU64};

/// Written last by the creator once the header is initialized ("WSPEVQ" + 01)
pub const SEGMENT_MAGIC: u64 = 0x5753_5045_5651_0001;

/// Bumped whenever the header layout changes
pub const LAYOUT_VERSION: u32 = 1;

/// File extension of queue segments
pub const SEGMENT_EXTENSION: &str = "wspq";

/// Longest accepted queue name
pub const MAX_NAME_LEN: usize = 200;

/// Record count limits
pub const MAX_QUEUE_CAPACITY: u32 = 1_000_000;

/// Ring size limits
pub const MIN_DATA_BYTES: usize = 64;
pub const MAX_DATA_BYTES: usize = 1024 * 1024 * 1024; // 1GB

/// Queue header at offset 0 of every segment
///
/// Every field is an atomic so that independent mappings in different
/// processes can share it. `head`, `tail`, `used` and `count` are only
/// written while `lock` is held; `used` and `count` may be read without
/// the lock for advisory sizes.
///
/// # Performance
/// - Cache-line aligned so the ring starts on its own line
#[repr(C, align(64))]
pub struct QueueHeader {
    pub magic: AtomicU64,
    pub version: AtomicU32,
    /// Holder pid, 0 when free
    pub lock: AtomicU32,
    /// Milliseconds since the epoch at which the current holder took the lock
    pub lock_since: AtomicU64,
    /// Maximum record count
    pub capacity: AtomicU32,
    /// Records currently queued
    pub count: AtomicU32,
    /// Ring length in bytes
    pub data_len: AtomicU64,
    /// Byte offset of the oldest record
    pub head: AtomicU64,
    /// Byte offset where the next record is written
    pub tail: AtomicU64,
    /// Occupied ring bytes, length prefixes included
    pub used: AtomicU64,
    /// Incremented on every enqueue and dequeue; waiters poll it
    pub sequence: AtomicU64,
}

/// Bytes reserved for the header before the ring
pub const HEADER_SIZE: usize = std::mem::size_of::<QueueHeader>();
