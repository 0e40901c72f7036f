/*!
 * Core Module
 * Shared types, configuration, timeouts and serialization helpers
 */

pub mod bincode;
pub mod config;
pub mod timeout;
pub mod types;
pub mod wait;

// Re-export for convenience
pub use config::{CapacityPolicy, EventConfig, ListenerFaultPolicy, OpenMode, QueueConfig};
pub use timeout::TimeoutPolicy;
pub use types::*;
pub use wait::Backoff;
