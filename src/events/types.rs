/*!
 * Event Types
 * Subscription requests and the routing header carried by every event
 */

use crate::core::types::{EventTypeId, SubscriptionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Interest in (or withdrawal from) one event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub event_type: EventTypeId,
    pub subscription_id: SubscriptionId,
    /// `true` to subscribe, `false` to withdraw
    pub subscribe: bool,
    /// Deliver only events that originated on the subscriber's host
    pub local_only: bool,
}

impl Subscription {
    /// Fresh subscription request with a new id
    pub fn new(event_type: EventTypeId, local_only: bool) -> Self {
        Self {
            event_type,
            subscription_id: Uuid::new_v4(),
            subscribe: true,
            local_only,
        }
    }

    /// The same subscription, flipped to a withdrawal
    #[must_use]
    pub fn withdrawal(&self) -> Self {
        Self {
            subscribe: false,
            ..*self
        }
    }
}

/// Routing header prepended to every application event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Host/router where the event was first published
    pub originating_router: String,
    /// Router that last forwarded the event
    pub last_hop_router: String,
    pub event_type: EventTypeId,
}

impl EventHeader {
    /// Header for an event published on `host`
    pub fn new(event_type: EventTypeId, host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            originating_router: host.clone(),
            last_hop_router: host,
            event_type,
        }
    }

    #[must_use]
    pub fn with_last_hop(mut self, router: impl Into<String>) -> Self {
        self.last_hop_router = router.into();
        self
    }

    /// Whether the event originated on `host` (case-insensitive)
    pub fn originated_on(&self, host: &str) -> bool {
        self.originating_router.eq_ignore_ascii_case(host)
    }
}
