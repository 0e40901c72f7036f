/*!
 * IPC Types
 * Error taxonomy for shared queue operations
 */

use miette::Diagnostic;
use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// IPC operation result
///
/// # Must Use
/// Queue operations can fail and must be handled to prevent lost records
pub type IpcResult<T> = Result<T, IpcError>;

/// Shared queue error type with miette diagnostics
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum IpcError {
    /// Named queue is absent and the caller asked not to create it
    #[error("Queue does not exist: {0}")]
    #[diagnostic(
        code(ipc::queue_does_not_exist),
        help("The owning service has not created this queue yet. Start it first or open with CreateOrOpen.")
    )]
    QueueDoesNotExist(String),

    /// Segment exists but cannot be used (layout, capacity, permissions)
    #[error("Queue initialization failed: {0}")]
    #[diagnostic(
        code(ipc::initialization_failed),
        help("Check segment permissions and that all participants agree on the queue capacity.")
    )]
    InitializationFailed(String),

    /// Backing segment could not be allocated
    #[error("Insufficient memory for queue: {0}")]
    #[diagnostic(
        code(ipc::insufficient_memory),
        help("The shared memory filesystem is full. Free space or lower the queue size.")
    )]
    InsufficientMemory(String),

    /// No room for the record right now
    #[error("Queue full: {len}/{capacity} records")]
    #[diagnostic(
        code(ipc::full),
        help("Consumers are not keeping up. Retry later or use a timed enqueue.")
    )]
    Full { len: u32, capacity: u32 },

    /// Operation timed out
    #[error("Queue operation timed out after {elapsed_ms}ms (timeout: {}ms)", timeout_ms.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string()))]
    #[diagnostic(
        code(ipc::timeout),
        help("The queue operation did not complete within the specified timeout.")
    )]
    Timeout {
        elapsed_ms: u64,
        timeout_ms: Option<u64>,
    },

    /// Invalid argument (empty or oversized record, bad name)
    #[error("Invalid queue argument: {0}")]
    #[diagnostic(code(ipc::invalid_argument))]
    InvalidArgument(String),

    /// Handle closed
    #[error("Queue closed: {0}")]
    #[diagnostic(
        code(ipc::closed),
        help("The queue handle has been closed and can no longer be used.")
    )]
    Closed(String),

    /// Shared structure failed a consistency check
    #[error("Queue corrupted: {0}")]
    #[diagnostic(
        code(ipc::corrupted),
        help("Remove the segment so the owning service can recreate it.")
    )]
    Corrupted(String),

    /// Any other OS-level failure
    #[error("Queue I/O error: {0}")]
    #[diagnostic(code(ipc::io))]
    Io(String),
}

impl IpcError {
    /// Classify an OS error raised while setting up or mapping a segment
    pub fn from_io(err: io::Error, context: &str) -> Self {
        let message = format!("{}: {}", context, err);
        if let Some(code) = err.raw_os_error() {
            match Errno::from_raw(code) {
                Errno::ENOSPC | Errno::ENOMEM | Errno::EFBIG => {
                    return IpcError::InsufficientMemory(message)
                }
                Errno::EACCES | Errno::EPERM | Errno::EROFS => {
                    return IpcError::InitializationFailed(message)
                }
                _ => {}
            }
        }
        match err.kind() {
            io::ErrorKind::NotFound => IpcError::QueueDoesNotExist(message),
            io::ErrorKind::PermissionDenied => IpcError::InitializationFailed(message),
            io::ErrorKind::OutOfMemory => IpcError::InsufficientMemory(message),
            _ => IpcError::Io(message),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, IpcError::Timeout { .. })
    }

    pub fn is_full(&self) -> bool {
        matches!(self, IpcError::Full { .. })
    }
}
