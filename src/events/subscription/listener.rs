/*!
 * Listener
 * Background thread draining a manager's queue and refreshing its table
 */

use super::dispatch::DispatchPool;
use super::fault::{FaultReporter, ManagerFault};
use super::table::SubscriptionTable;
use super::EventCallback;
use crate::core::config::ListenerFaultPolicy;
use crate::core::timeout::TimeoutPolicy;
use crate::events::publish::EventPublisher;
use crate::events::wire::{self, WireRecord};
use crate::ipc::{EventQueue, IpcError};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Floor for a single dequeue wait
const MIN_POLL: Duration = Duration::from_millis(1);

/// Slice used when sleeping after a fault so a stop request is noticed
const STOP_CHECK: Duration = Duration::from_millis(10);

/// Everything the listener thread owns
pub(super) struct Listener {
    pub queue: Arc<dyn EventQueue>,
    pub publisher: Arc<dyn EventPublisher>,
    pub table: SubscriptionTable,
    pub dispatcher: Arc<DispatchPool>,
    pub callback: EventCallback,
    pub faults: FaultReporter,
    pub host_name: String,
    pub poll_timeout: Duration,
    pub refresh_interval: Duration,
    pub fault_policy: ListenerFaultPolicy,
}

impl Listener {
    fn run(self, stop: &AtomicBool) {
        info!(host = %self.host_name, "Listener started");
        let mut next_refresh = Instant::now() + self.refresh_interval;

        while !stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= next_refresh {
                self.refresh();
                next_refresh = now + self.refresh_interval;
                continue;
            }

            let wait = self.poll_timeout.min(next_refresh - now).max(MIN_POLL);
            match self.queue.dequeue(TimeoutPolicy::Ipc(wait)) {
                Ok(Some(record)) => self.route(&record),
                Ok(None) => {}
                Err(IpcError::Closed(reason)) => {
                    debug!(%reason, "Listener queue closed");
                    break;
                }
                Err(error) => {
                    self.faults.report(ManagerFault::ListenerFault { error });
                    match self.fault_policy {
                        ListenerFaultPolicy::Stop => break,
                        ListenerFaultPolicy::Retry { pause } => pause_unless_stopped(pause, stop),
                    }
                }
            }
        }

        info!("Listener stopped");
    }

    /// Hand a matching event to the dispatch pool
    fn route(&self, record: &[u8]) {
        match wire::decode(record) {
            Ok(WireRecord::Event { header, payload }) => {
                let Some(subscription) = self.table.get(&header.event_type) else {
                    trace!(event_type = %header.event_type, "No subscription, dropping event");
                    return;
                };
                if subscription.local_only && !header.originated_on(&self.host_name) {
                    trace!(
                        event_type = %header.event_type,
                        origin = %header.originating_router,
                        "Remote event filtered by local-only subscription"
                    );
                    return;
                }

                let event_type = header.event_type;
                let payload = payload.to_vec();
                let callback = Arc::clone(&self.callback);
                let faults = self.faults.clone();
                let dispatched = self.dispatcher.dispatch(move || {
                    let delivered =
                        panic::catch_unwind(AssertUnwindSafe(move || callback(event_type, payload)));
                    if delivered.is_err() {
                        faults.report(ManagerFault::CallbackPanicked { event_type });
                    }
                });
                if !dispatched {
                    debug!(%event_type, "Dispatch pool shut down, event dropped");
                }
            }
            Ok(WireRecord::Subscription(subscription)) => {
                trace!(event_type = %subscription.event_type, "Ignoring subscription record");
            }
            Err(error) => {
                warn!(%error, len = record.len(), "Discarding undecodable record");
            }
        }
    }

    /// Republish every live subscription
    fn refresh(&self) {
        let subscriptions = self.table.snapshot();
        if subscriptions.is_empty() {
            return;
        }
        debug!(count = subscriptions.len(), "Refreshing subscriptions");

        for subscription in subscriptions {
            let published = {
                let _announcing = self.table.lock_announcements();
                // Skip entries withdrawn or replaced since the snapshot
                if self.table.get(&subscription.event_type) != Some(subscription) {
                    continue;
                }
                self.publisher.publish_subscription(&subscription)
            };
            if let Err(error) = published {
                self.faults.report(ManagerFault::RefreshFailed {
                    event_type: subscription.event_type,
                    subscription_id: subscription.subscription_id,
                    error,
                });
            }
        }
    }
}

fn pause_unless_stopped(pause: Duration, stop: &AtomicBool) {
    let until = Instant::now() + pause;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= until {
            break;
        }
        thread::sleep(STOP_CHECK.min(until - now));
    }
}

/// Running listener thread
pub(super) struct ListenerHandle {
    stop: Arc<AtomicBool>,
    exited: flume::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn spawn(listener: Listener) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        // Dropped when the thread finishes, panics included
        let (exit_tx, exit_rx) = flume::bounded::<()>(1);

        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("wsp-listener".to_string())
            .spawn(move || {
                let _exit = exit_tx;
                listener.run(&thread_stop);
            })?;

        Ok(Self {
            stop,
            exited: exit_rx,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.exited.is_disconnected()
    }

    /// Request a stop and wait up to `timeout`; `false` if the thread had
    /// to be detached
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        match self.exited.recv_timeout(timeout) {
            Err(flume::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Listener did not stop in time, detaching"
                );
                self.thread.take();
                false
            }
            _ => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        error!("Listener thread panicked");
                    }
                }
                true
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
