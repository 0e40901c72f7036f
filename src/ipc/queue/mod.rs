/*!
 * Queue Module
 * Bounded FIFO record queues: shared-memory engine and in-process variant
 */

pub mod memory;
pub mod ring;
pub mod shared;
pub mod types;

// Re-export public API
pub use memory::MemoryQueue;
pub use shared::SharedQueue;
pub use types::QueueStats;
