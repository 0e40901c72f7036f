/*!
 * Subscription Manager
 */

use super::dispatch::DispatchPool;
use super::fault::{FaultHook, FaultReporter, ManagerFault};
use super::listener::{Listener, ListenerHandle};
use super::table::SubscriptionTable;
use super::EventCallback;
use crate::core::config::EventConfig;
use crate::core::types::{EventTypeId, SubscriptionId};
use crate::events::errors::{PublishError, SubscriptionError, SubscriptionResult};
use crate::events::publish::EventPublisher;
use crate::events::shared::{PublisherLease, SharedPublisher};
use crate::events::types::Subscription;
use crate::ipc::{EventQueue, SharedQueue};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Subscribes to event types and delivers matching events to a callback
///
/// Each manager listens on its own queue (`config.queue`) and announces
/// subscriptions through a lease on a [`SharedPublisher`]. The listener
/// starts enabled. [`dispose`](Self::dispose) (or drop) withdraws every
/// subscription, stops the listener and releases both queue handles.
pub struct SubscriptionManager {
    config: EventConfig,
    table: SubscriptionTable,
    callback: EventCallback,
    faults: FaultReporter,
    dispatcher: Arc<DispatchPool>,
    queue: Mutex<Option<Arc<dyn EventQueue>>>,
    lease: Mutex<Option<PublisherLease>>,
    listener: Mutex<Option<ListenerHandle>>,
    disposed: AtomicBool,
}

impl SubscriptionManager {
    /// Open the configured listen queue and start listening
    pub fn new<F>(config: EventConfig, publishers: &SharedPublisher, callback: F) -> SubscriptionResult<Self>
    where
        F: Fn(EventTypeId, Vec<u8>) + Send + Sync + 'static,
    {
        let queue = SharedQueue::open(&config.queue)
            .map_err(|err| SubscriptionError::Initialization(PublishError::from_open_error(err)))?;
        Self::with_queue(config, Arc::new(queue), publishers, callback)
    }

    /// Listen on an already opened queue
    pub fn with_queue<F>(
        config: EventConfig,
        queue: Arc<dyn EventQueue>,
        publishers: &SharedPublisher,
        callback: F,
    ) -> SubscriptionResult<Self>
    where
        F: Fn(EventTypeId, Vec<u8>) + Send + Sync + 'static,
    {
        let lease = publishers.acquire().map_err(SubscriptionError::Initialization)?;
        let dispatcher = DispatchPool::new(config.dispatch_workers)
            .map_err(|err| SubscriptionError::ListenerSpawn(err.to_string()))?;

        let manager = Self {
            config,
            table: SubscriptionTable::new(),
            callback: Arc::new(callback),
            faults: FaultReporter::default(),
            dispatcher: Arc::new(dispatcher),
            queue: Mutex::new(Some(queue)),
            lease: Mutex::new(Some(lease)),
            listener: Mutex::new(None),
            disposed: AtomicBool::new(false),
        };
        manager.set_listening(true)?;

        info!(
            queue = %manager.config.queue.name,
            host = %manager.config.host_name,
            refresh_secs = manager.config.refresh_interval.as_secs(),
            "Subscription manager started"
        );
        Ok(manager)
    }

    /// Announce interest in `event_type` and record it locally
    ///
    /// Replaces any existing subscription for the type. On publish failure
    /// the table is left unchanged.
    pub fn add_subscription(&self, event_type: EventTypeId, local_only: bool) -> SubscriptionResult<SubscriptionId> {
        let publisher = self.publisher()?;
        let subscription = Subscription::new(event_type, local_only);

        let _announcing = self.table.lock_announcements();
        publisher.publish_subscription(&subscription)?;
        if let Some(previous) = self.table.insert(subscription) {
            debug!(
                %event_type,
                previous = %previous.subscription_id,
                "Subscription replaced"
            );
        }
        info!(
            %event_type,
            subscription_id = %subscription.subscription_id,
            local_only,
            "Subscribed"
        );
        Ok(subscription.subscription_id)
    }

    /// Withdraw the subscription for `event_type`, if any
    ///
    /// Best effort: a failed withdrawal publish is reported to the fault
    /// hook and the entry is removed anyway. Always returns `true`; an
    /// event type with no subscription is a no-op.
    pub fn remove_subscription(&self, event_type: EventTypeId) -> bool {
        if let Some(subscription) = self.table.get(&event_type) {
            self.withdraw(subscription);
        }
        true
    }

    /// Event types with an active subscription
    pub fn subscriptions(&self) -> HashSet<EventTypeId> {
        self.table.event_types()
    }

    pub fn subscription(&self, event_type: &EventTypeId) -> Option<Subscription> {
        self.table.get(event_type)
    }

    /// Start or stop the background listener
    ///
    /// Stopping waits up to `join_timeout` for the thread to finish.
    pub fn set_listening(&self, listening: bool) -> SubscriptionResult<()> {
        let mut slot = self.listener.lock();
        if listening {
            if slot.as_ref().is_some_and(ListenerHandle::is_running) {
                return Ok(());
            }
            // A listener that ended on its own is reaped before respawning
            if let Some(finished) = slot.take() {
                finished.stop(self.config.join_timeout);
            }
            let listener = self.listener_context()?;
            let handle = ListenerHandle::spawn(listener)
                .map_err(|err| SubscriptionError::ListenerSpawn(err.to_string()))?;
            *slot = Some(handle);
        } else if let Some(handle) = slot.take() {
            if !handle.stop(self.config.join_timeout) {
                warn!(queue = %self.config.queue.name, "Listener detached while stopping");
            }
        }
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(ListenerHandle::is_running)
    }

    /// Observe background failures; `None` removes the hook
    pub fn set_fault_hook(&self, hook: Option<FaultHook>) {
        self.faults.set_hook(hook);
    }

    pub fn on_fault<F>(&self, hook: F)
    where
        F: Fn(&ManagerFault) + Send + Sync + 'static,
    {
        self.set_fault_hook(Some(Arc::new(hook)));
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Withdraw everything, stop listening and release both queue handles
    ///
    /// Idempotent; later calls return immediately.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let subscriptions = self.table.snapshot();
        let withdrawn = subscriptions.len();
        for subscription in subscriptions {
            self.withdraw(subscription);
        }

        if let Some(handle) = self.listener.lock().take() {
            if !handle.stop(self.config.join_timeout) {
                warn!(queue = %self.config.queue.name, "Listener detached during dispose");
            }
        }

        if let Some(queue) = self.queue.lock().take() {
            // A detached listener may still hold the handle
            if Arc::strong_count(&queue) == 1 {
                queue.close();
            }
        }
        self.lease.lock().take();
        self.dispatcher.shutdown();

        info!(queue = %self.config.queue.name, withdrawn, "Subscription manager disposed");
    }

    /// Publish the withdrawal and drop the entry as one step relative to
    /// the listener's refresh
    fn withdraw(&self, subscription: Subscription) -> bool {
        let withdrawal = subscription.withdrawal();
        let publisher = self.lease.lock().as_ref().map(PublisherLease::publisher);

        let (published, removed) = {
            let _announcing = self.table.lock_announcements();
            let published = match publisher {
                Some(publisher) => publisher.publish_subscription(&withdrawal),
                None => Err(PublishError::Closed),
            };
            (published, self.table.remove_exact(&subscription))
        };

        if let Err(error) = published {
            self.faults.report(ManagerFault::UnsubscribeFailed {
                event_type: subscription.event_type,
                subscription_id: subscription.subscription_id,
                error,
            });
        }
        if removed {
            info!(event_type = %subscription.event_type, "Unsubscribed");
        }
        removed
    }

    fn publisher(&self) -> SubscriptionResult<Arc<dyn EventPublisher>> {
        if self.is_disposed() {
            return Err(SubscriptionError::Disposed);
        }
        self.lease
            .lock()
            .as_ref()
            .map(PublisherLease::publisher)
            .ok_or(SubscriptionError::Disposed)
    }

    fn listener_context(&self) -> SubscriptionResult<Listener> {
        let queue = self
            .queue
            .lock()
            .as_ref()
            .map(Arc::clone)
            .ok_or(SubscriptionError::Disposed)?;
        Ok(Listener {
            queue,
            publisher: self.publisher()?,
            table: self.table.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            callback: Arc::clone(&self.callback),
            faults: self.faults.clone(),
            host_name: self.config.host_name.clone(),
            poll_timeout: self.config.timeout,
            refresh_interval: self.config.refresh_interval,
            fault_policy: self.config.fault_policy,
        })
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
