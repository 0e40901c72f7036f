/*!
 * Subscription Table
 * Concurrent map of event type to its active subscription
 */

use crate::core::types::EventTypeId;
use crate::events::types::Subscription;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;

/// One active subscription per event type; the last writer wins
///
/// Announcing a subscription state (publish + table update, or a refresh
/// check + publish) happens under `lock_announcements`, so the router never
/// sees a refresh land after the withdrawal of the same entry.
#[derive(Clone)]
pub struct SubscriptionTable {
    entries: Arc<DashMap<EventTypeId, Subscription, RandomState>>,
    announce: Arc<Mutex<()>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::with_hasher(RandomState::new())),
            announce: Arc::new(Mutex::new(())),
        }
    }

    /// Serialize publishes that announce subscription state
    pub fn lock_announcements(&self) -> MutexGuard<'_, ()> {
        self.announce.lock()
    }

    /// Insert or replace; returns the replaced subscription
    pub fn insert(&self, subscription: Subscription) -> Option<Subscription> {
        self.entries.insert(subscription.event_type, subscription)
    }

    pub fn get(&self, event_type: &EventTypeId) -> Option<Subscription> {
        self.entries.get(event_type).map(|entry| *entry.value())
    }

    /// Remove only if the entry is still this exact subscription
    pub fn remove_exact(&self, subscription: &Subscription) -> bool {
        self.entries
            .remove_if(&subscription.event_type, |_, current| {
                current.subscription_id == subscription.subscription_id
            })
            .is_some()
    }

    pub fn contains(&self, event_type: &EventTypeId) -> bool {
        self.entries.contains_key(event_type)
    }

    pub fn event_types(&self) -> HashSet<EventTypeId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Copy of every entry; no shard lock is held afterwards
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.iter().map(|entry| *entry.value()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}
