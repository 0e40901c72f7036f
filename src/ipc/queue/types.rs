/*!
 * Queue Types
 * Statistics reported by shared queue handles
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: String,
    pub path: PathBuf,
    /// Maximum record count
    pub capacity: u32,
    /// Records queued at the time of the snapshot
    pub length: u32,
    /// Occupied ring bytes, length prefixes included
    pub used_bytes: usize,
    /// Ring size
    pub data_bytes: usize,
    /// Enqueues plus dequeues since creation
    pub sequence: u64,
    /// Pid holding the segment lock at the time of the snapshot
    pub lock_holder: Option<u32>,
    pub closed: bool,
}
