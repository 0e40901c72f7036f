/*!
 * Shared Memory Module
 * Named, file-backed segments holding a queue header and record ring
 */

pub mod lock;
pub mod segment;
pub mod types;

// Re-export public API
pub use lock::{SegmentLock, SegmentLockGuard};
pub use segment::SharedSegment;
pub use types::{QueueHeader, HEADER_SIZE, LAYOUT_VERSION, SEGMENT_MAGIC};
