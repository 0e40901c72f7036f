/*!
 * IPC Module
 * Named shared-memory queues and the cross-process primitives under them
 */

pub mod core;
pub mod queue;
pub mod shm;

// Re-export for convenience
pub use self::core::*;
pub use queue::{MemoryQueue, QueueStats, SharedQueue};
pub use shm::SharedSegment;
