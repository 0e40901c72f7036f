/*!
 * Events Module
 * Publish/subscribe on top of the shared queue: wire records, the retrying
 * publisher, the shared publisher handle and subscription managers
 */

pub mod errors;
pub mod publish;
pub mod shared;
pub mod subscription;
pub mod types;
pub mod wire;

// Re-export public API
pub use errors::{PublishError, PublishResult, SubscriptionError, SubscriptionResult};
pub use publish::{EventPublisher, PublishManager, RetryPolicy};
pub use shared::{PublisherLease, SharedPublisher};
pub use subscription::{EventCallback, FaultHook, ManagerFault, SubscriptionManager};
pub use types::{EventHeader, Subscription};
pub use wire::{WireError, WireRecord};
