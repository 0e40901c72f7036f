/*!
 * Subscription Management
 *
 * A `SubscriptionManager` owns the subscription table, a background
 * listener draining its own queue, and a small worker pool that runs the
 * application callback. Subscriptions are republished on a fixed interval
 * so the router can expire state from processes that went away.
 */

mod dispatch;
mod fault;
mod listener;
mod manager;
mod table;

pub use dispatch::DispatchPool;
pub use fault::{FaultHook, ManagerFault};
pub use manager::SubscriptionManager;
pub use table::SubscriptionTable;

use crate::core::types::EventTypeId;
use std::sync::Arc;

/// Application callback: event type and payload bytes
pub type EventCallback = Arc<dyn Fn(EventTypeId, Vec<u8>) + Send + Sync>;
