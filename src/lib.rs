/*!
 * WSP Events Library
 * Cross-process shared memory event queues with publish/subscribe on top
 */

pub mod core;
pub mod events;
pub mod ipc;
pub mod monitoring;

// Re-exports
pub use crate::core::{
    CapacityPolicy, EventConfig, EventTypeId, ListenerFaultPolicy, OpenMode, QueueConfig, SubscriptionId,
    TimeoutPolicy,
};
pub use events::{
    EventCallback, EventHeader, EventPublisher, FaultHook, ManagerFault, PublishError, PublishManager,
    PublishResult, PublisherLease, RetryPolicy, SharedPublisher, Subscription, SubscriptionError,
    SubscriptionManager, SubscriptionResult,
};
pub use ipc::{EventQueue, IpcError, IpcResult, MemoryQueue, QueueStats, SharedQueue};
pub use monitoring::{init_tracing, OperationSpan};
