/*!
 * IPC Core Module
 * Queue error taxonomy and the queue trait seam
 */

pub mod traits;
pub mod types;

// Re-export for convenience
pub use traits::*;
pub use types::*;
