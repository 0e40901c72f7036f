/*!
 * Publish Manager
 * Writes records to an event queue, retrying timed-out enqueues
 */

use super::errors::{PublishError, PublishResult};
use super::types::{EventHeader, Subscription};
use super::wire;
use crate::core::config::EventConfig;
use crate::core::timeout::TimeoutPolicy;
use crate::ipc::{EventQueue, IpcError, SharedQueue};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a timed-out enqueue is repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub attempts: u32,
    /// Sleep between attempts
    pub pause: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, pause: Duration) -> Self {
        Self { attempts, pause }
    }

    pub const fn none() -> Self {
        Self {
            attempts: 0,
            pause: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::core::config::DEFAULT_RETRY_ATTEMPTS,
            crate::core::config::DEFAULT_RETRY_PAUSE,
        )
    }
}

impl From<&EventConfig> for RetryPolicy {
    fn from(config: &EventConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_pause)
    }
}

/// Anything that can put a record on the event queue
pub trait EventPublisher: Send + Sync {
    /// Publish one raw record
    fn publish(&self, data: &[u8]) -> PublishResult<()>;

    /// Publish a subscription (or withdrawal) record
    fn publish_subscription(&self, subscription: &Subscription) -> PublishResult<()> {
        let record = wire::encode_subscription(subscription)?;
        self.publish(&record)
    }

    /// Publish an application event behind its routing header
    fn publish_event(&self, header: &EventHeader, payload: &[u8]) -> PublishResult<()> {
        if payload.is_empty() {
            return Err(PublishError::InvalidArgument(
                "Event payload must not be empty".to_string(),
            ));
        }
        let record = wire::encode_event(header, payload)?;
        self.publish(&record)
    }
}

/// Owns one queue handle and publishes into it
///
/// Enqueue timeouts are retried `retry.attempts` more times with
/// `retry.pause` between them. A full queue under a non-blocking timeout
/// surfaces immediately as `QueueFull`.
pub struct PublishManager<Q: EventQueue = SharedQueue> {
    queue: ArcSwapOption<Q>,
    timeout: TimeoutPolicy,
    retry: RetryPolicy,
}

impl PublishManager<SharedQueue> {
    /// Open (or create) the configured shared queue
    pub fn open(config: &EventConfig) -> PublishResult<Self> {
        let queue = SharedQueue::open(&config.queue).map_err(PublishError::from_open_error)?;
        info!(
            queue = %config.queue.name,
            timeout_ms = config.timeout.as_millis() as u64,
            retries = config.retry_attempts,
            "Publish manager opened"
        );
        Ok(Self::with_queue(
            queue,
            config.timeout_policy(),
            RetryPolicy::from(config),
        ))
    }
}

impl<Q: EventQueue> PublishManager<Q> {
    pub fn with_queue(queue: Q, timeout: TimeoutPolicy, retry: RetryPolicy) -> Self {
        Self::from_arc(Arc::new(queue), timeout, retry)
    }

    /// Publish into a queue handle shared with other owners
    pub fn from_arc(queue: Arc<Q>, timeout: TimeoutPolicy, retry: RetryPolicy) -> Self {
        Self {
            queue: ArcSwapOption::new(Some(queue)),
            timeout,
            retry,
        }
    }

    pub fn timeout(&self) -> TimeoutPolicy {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn publish(&self, data: &[u8]) -> PublishResult<()> {
        if data.is_empty() {
            return Err(PublishError::InvalidArgument(
                "Cannot publish an empty record".to_string(),
            ));
        }
        let queue = self.queue.load_full().ok_or(PublishError::Closed)?;

        let start = Instant::now();
        let mut retries = 0;
        loop {
            match queue.enqueue(data, self.timeout) {
                Ok(()) => {
                    if retries > 0 {
                        debug!(retries, "Publish succeeded after retry");
                    }
                    return Ok(());
                }
                Err(IpcError::Timeout { .. }) if retries < self.retry.attempts => {
                    retries += 1;
                    warn!(
                        attempt = retries,
                        max_retries = self.retry.attempts,
                        pause_ms = self.retry.pause.as_millis() as u64,
                        "Publish timed out, retrying"
                    );
                    thread::sleep(self.retry.pause);
                }
                Err(IpcError::Timeout { .. }) => {
                    return Err(PublishError::Timeout {
                        attempts: retries + 1,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Release the queue handle; later publishes fail with `Closed`
    pub fn close(&self) {
        if let Some(queue) = self.queue.swap(None) {
            // Only close the handle if nobody else shares it
            if let Ok(queue) = Arc::try_unwrap(queue) {
                queue.close();
            }
            debug!("Publish manager closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.load().is_none()
    }
}

impl<Q: EventQueue> EventPublisher for PublishManager<Q> {
    fn publish(&self, data: &[u8]) -> PublishResult<()> {
        PublishManager::publish(self, data)
    }
}

impl<Q: EventQueue> Drop for PublishManager<Q> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::MemoryQueue;

    fn manager(capacity: usize, timeout: TimeoutPolicy) -> (Arc<MemoryQueue>, PublishManager<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new(capacity));
        let manager = PublishManager::from_arc(
            Arc::clone(&queue),
            timeout,
            RetryPolicy::new(2, Duration::from_millis(10)),
        );
        (queue, manager)
    }

    #[test]
    fn test_publish_lands_in_queue() {
        let (queue, manager) = manager(4, TimeoutPolicy::NoWait);
        manager.publish(b"record").unwrap();
        assert_eq!(queue.try_dequeue().unwrap().as_deref(), Some(&b"record"[..]));
    }

    #[test]
    fn test_empty_record_rejected() {
        let (queue, manager) = manager(4, TimeoutPolicy::NoWait);
        assert!(matches!(
            manager.publish(b""),
            Err(PublishError::InvalidArgument(_))
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_under_no_wait() {
        let (_queue, manager) = manager(1, TimeoutPolicy::NoWait);
        manager.publish(b"a").unwrap();
        assert!(matches!(
            manager.publish(b"b"),
            Err(PublishError::QueueFull { .. })
        ));
    }

    #[test]
    fn test_timeout_after_retries() {
        let (_queue, manager) = manager(1, TimeoutPolicy::Ipc(Duration::from_millis(5)));
        manager.publish(b"a").unwrap();
        match manager.publish(b"b") {
            Err(PublishError::Timeout { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_queue, manager) = manager(4, TimeoutPolicy::NoWait);
        manager.close();
        manager.close();
        assert!(manager.is_closed());
        assert_eq!(manager.publish(b"x"), Err(PublishError::Closed));
    }

    #[test]
    fn test_publish_event_rejects_empty_payload() {
        let (queue, manager) = manager(4, TimeoutPolicy::NoWait);
        let header = EventHeader::new(uuid::Uuid::new_v4(), "host");
        assert!(matches!(
            manager.publish_event(&header, b""),
            Err(PublishError::InvalidArgument(_))
        ));
        assert!(queue.is_empty());
    }
}
