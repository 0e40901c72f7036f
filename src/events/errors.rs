/*!
 * Event Errors
 * Publish and subscription failures with miette diagnostics
 */

use super::wire::WireError;
use crate::ipc::IpcError;
use miette::Diagnostic;
use thiserror::Error;

pub type PublishResult<T> = Result<T, PublishError>;
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Publisher failure
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum PublishError {
    #[error("Queue connection failed: {0}")]
    #[diagnostic(code(publish::connection_failed))]
    ConnectionFailed(String),

    #[error("Event queue is missing: {0}")]
    #[diagnostic(
        code(publish::queue_missing),
        help("The event router has not created its queue. Start the router first.")
    )]
    QueueMissing(String),

    #[error("Insufficient memory: {0}")]
    #[diagnostic(code(publish::insufficient_memory))]
    InsufficientMemory(String),

    #[error("Publisher initialization failed: {0}")]
    #[diagnostic(code(publish::initialization_failed))]
    InitializationFailed(String),

    #[error("Event queue full: {len}/{capacity} records")]
    #[diagnostic(
        code(publish::queue_full),
        help("The router is not draining the queue. Publishing again later may succeed.")
    )]
    QueueFull { len: u32, capacity: u32 },

    #[error("Publish timed out after {attempts} attempt(s) in {elapsed_ms}ms")]
    #[diagnostic(code(publish::timeout))]
    Timeout { attempts: u32, elapsed_ms: u64 },

    #[error("Invalid argument: {0}")]
    #[diagnostic(code(publish::invalid_argument))]
    InvalidArgument(String),

    #[error("Record encoding failed: {0}")]
    #[diagnostic(code(publish::serialization))]
    Serialization(String),

    #[error("Publisher closed")]
    #[diagnostic(code(publish::closed))]
    Closed,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Queue(IpcError),
}

impl PublishError {
    /// Translate a failure to open the queue into one of the four
    /// construction errors; nothing else escapes construction
    pub fn from_open_error(err: IpcError) -> Self {
        match err {
            IpcError::QueueDoesNotExist(name) => PublishError::QueueMissing(name),
            IpcError::InsufficientMemory(msg) => PublishError::InsufficientMemory(msg),
            IpcError::InitializationFailed(msg)
            | IpcError::InvalidArgument(msg)
            | IpcError::Corrupted(msg) => PublishError::InitializationFailed(msg),
            other => PublishError::ConnectionFailed(other.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PublishError::Timeout { .. })
    }
}

impl From<IpcError> for PublishError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::QueueDoesNotExist(name) => PublishError::QueueMissing(name),
            IpcError::InsufficientMemory(msg) => PublishError::InsufficientMemory(msg),
            IpcError::InitializationFailed(msg) => PublishError::InitializationFailed(msg),
            IpcError::Full { len, capacity } => PublishError::QueueFull { len, capacity },
            IpcError::Timeout { elapsed_ms, .. } => PublishError::Timeout {
                attempts: 1,
                elapsed_ms,
            },
            IpcError::InvalidArgument(msg) => PublishError::InvalidArgument(msg),
            IpcError::Io(msg) => PublishError::ConnectionFailed(msg),
            other => PublishError::Queue(other),
        }
    }
}

impl From<WireError> for PublishError {
    fn from(err: WireError) -> Self {
        PublishError::Serialization(err.to_string())
    }
}

/// Subscription manager failure
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SubscriptionError {
    /// Queue or publisher could not be set up
    #[error("Subscription manager initialization failed: {0}")]
    #[diagnostic(code(subscription::initialization))]
    Initialization(#[source] PublishError),

    /// Publishing the subscription record failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Publish(#[from] PublishError),

    #[error("Subscription manager has been disposed")]
    #[diagnostic(code(subscription::disposed))]
    Disposed,

    #[error("Failed to start listener thread: {0}")]
    #[diagnostic(code(subscription::listener_spawn))]
    ListenerSpawn(String),
}
