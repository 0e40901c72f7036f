/*!
 * IPC Traits
 * Queue abstraction shared by the shared-memory engine and in-process queues
 */

use super::types::IpcResult;
use crate::core::timeout::TimeoutPolicy;

/// Bounded FIFO of opaque byte records
///
/// Implementations serialize access internally; every method may be called
/// concurrently from many threads.
pub trait EventQueue: Send + Sync {
    /// Append a record, waiting up to `timeout` for room.
    ///
    /// Fails with `Timeout` when the deadline passes and with `Full` when
    /// the policy is `NoWait` and the queue has no room.
    fn enqueue(&self, data: &[u8], timeout: TimeoutPolicy) -> IpcResult<()>;

    /// Remove the head record, waiting up to `timeout` for one to arrive.
    ///
    /// `Ok(None)` means the timeout elapsed on an empty queue.
    fn dequeue(&self, timeout: TimeoutPolicy) -> IpcResult<Option<Vec<u8>>>;

    /// Append without waiting
    fn try_enqueue(&self, data: &[u8]) -> IpcResult<()> {
        self.enqueue(data, TimeoutPolicy::NoWait)
    }

    /// Remove the head record without waiting
    fn try_dequeue(&self) -> IpcResult<Option<Vec<u8>>> {
        self.dequeue(TimeoutPolicy::NoWait)
    }

    /// Occupied bytes; advisory, may be stale under concurrent use
    fn size(&self) -> usize;

    /// Number of records currently queued; advisory
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release this handle; later operations fail with `Closed`
    fn close(&self);
}
