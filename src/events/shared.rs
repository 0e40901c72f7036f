/*!
 * Shared Publisher
 *
 * One publisher per handle family, created on the first lease and torn down
 * when the last lease drops. Construction and teardown run under the same
 * lock, so a lease taken while the last one is being released sees either
 * the old publisher or a fresh one, never a half-closed one.
 */

use super::errors::{PublishError, PublishResult};
use super::publish::{EventPublisher, PublishManager};
use crate::core::config::EventConfig;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

type PublisherFactory = dyn Fn() -> PublishResult<Arc<dyn EventPublisher>> + Send + Sync;

struct SlotState {
    publisher: Option<Arc<dyn EventPublisher>>,
    leases: usize,
}

struct SharedInner {
    slot: Mutex<SlotState>,
    factory: Box<PublisherFactory>,
}

/// Reference-counted access to a lazily created publisher
///
/// Cloning the handle shares the same publisher; pass it to every
/// subscription manager that should publish through one queue handle.
#[derive(Clone)]
pub struct SharedPublisher {
    inner: Arc<SharedInner>,
}

impl SharedPublisher {
    /// Publisher family backed by the configured shared queue
    pub fn new(config: EventConfig) -> Self {
        Self::with_factory(move || {
            let manager = PublishManager::open(&config)?;
            Ok(Arc::new(manager) as Arc<dyn EventPublisher>)
        })
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> PublishResult<Arc<dyn EventPublisher>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SharedInner {
                slot: Mutex::new(SlotState {
                    publisher: None,
                    leases: 0,
                }),
                factory: Box::new(factory),
            }),
        }
    }

    /// Take a lease, constructing the publisher if none is live
    pub fn acquire(&self) -> PublishResult<PublisherLease> {
        let mut slot = self.inner.slot.lock();
        let publisher = match &slot.publisher {
            Some(publisher) => Arc::clone(publisher),
            None => {
                let publisher = (self.inner.factory)()?;
                slot.publisher = Some(Arc::clone(&publisher));
                info!("Shared publisher constructed");
                publisher
            }
        };
        slot.leases += 1;
        Ok(PublisherLease {
            publisher: Some(publisher),
            owner: Arc::clone(&self.inner),
        })
    }

    pub fn lease_count(&self) -> usize {
        self.inner.slot.lock().leases
    }

    /// Whether a publisher currently exists
    pub fn is_active(&self) -> bool {
        self.inner.slot.lock().publisher.is_some()
    }
}

impl fmt::Debug for SharedPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("SharedPublisher")
            .field("active", &slot.publisher.is_some())
            .field("leases", &slot.leases)
            .finish()
    }
}

/// One holder's claim on the shared publisher
pub struct PublisherLease {
    /// `None` only once the lease has been released in `drop`
    publisher: Option<Arc<dyn EventPublisher>>,
    owner: Arc<SharedInner>,
}

impl PublisherLease {
    /// Clone of the underlying publisher for use on other threads
    ///
    /// The clone does not keep the lease alive.
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        match &self.publisher {
            Some(publisher) => Arc::clone(publisher),
            None => Arc::new(Released),
        }
    }
}

impl Deref for PublisherLease {
    type Target = dyn EventPublisher;

    fn deref(&self) -> &Self::Target {
        match &self.publisher {
            Some(publisher) => publisher.as_ref(),
            None => &Released,
        }
    }
}

impl Drop for PublisherLease {
    fn drop(&mut self) {
        let mut slot = self.owner.slot.lock();
        // Both handles go under the lock so teardown finishes before any
        // new publisher can be built
        drop(self.publisher.take());
        slot.leases = slot.leases.saturating_sub(1);
        if slot.leases == 0 {
            if let Some(publisher) = slot.publisher.take() {
                drop(publisher);
                info!("Shared publisher released");
            }
        }
    }
}

/// Stand-in seen through a lease that has already been released
struct Released;

impl EventPublisher for Released {
    fn publish(&self, _data: &[u8]) -> PublishResult<()> {
        Err(PublishError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl EventPublisher for Counting {
        fn publish(&self, _data: &[u8]) -> PublishResult<()> {
            Ok(())
        }
    }

    impl Drop for Counting {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (SharedPublisher, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let (l, b) = (Arc::clone(&live), Arc::clone(&built));
        let shared = SharedPublisher::with_factory(move || {
            l.fetch_add(1, Ordering::SeqCst);
            b.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Counting(Arc::clone(&l))) as Arc<dyn EventPublisher>)
        });
        (shared, live, built)
    }

    #[test]
    fn test_one_publisher_per_family() {
        let (shared, live, built) = counting();
        let a = shared.acquire().unwrap();
        let b = shared.clone().acquire().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(shared.lease_count(), 2);

        drop(a);
        assert!(shared.is_active());
        assert_eq!(live.load(Ordering::SeqCst), 1);

        drop(b);
        assert!(!shared.is_active());
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_recreated_after_teardown() {
        let (shared, _live, built) = counting();
        drop(shared.acquire().unwrap());
        let _lease = shared.acquire().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_factory_failure_takes_no_lease() {
        let shared = SharedPublisher::with_factory(|| Err(PublishError::QueueMissing("q".into())));
        assert!(matches!(
            shared.acquire(),
            Err(PublishError::QueueMissing(_))
        ));
        assert_eq!(shared.lease_count(), 0);
    }

    struct SlowTeardown(Arc<AtomicUsize>);

    impl EventPublisher for SlowTeardown {
        fn publish(&self, _data: &[u8]) -> PublishResult<()> {
            Ok(())
        }
    }

    impl Drop for SlowTeardown {
        fn drop(&mut self) {
            std::thread::sleep(std::time::Duration::from_millis(200));
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_no_overlap_between_teardown_and_rebuild() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (l, p) = (Arc::clone(&live), Arc::clone(&peak));
        let shared = SharedPublisher::with_factory(move || {
            let now = l.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            Ok(Arc::new(SlowTeardown(Arc::clone(&l))) as Arc<dyn EventPublisher>)
        });

        let lease = shared.acquire().unwrap();
        let releasing = std::thread::spawn(move || drop(lease));
        std::thread::sleep(std::time::Duration::from_millis(50));

        let rebuilt = shared.acquire().unwrap();
        releasing.join().unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        rebuilt.publish(b"x").unwrap();
    }

    #[test]
    fn test_released_lease_view_is_closed() {
        assert_eq!(Released.publish(b"x"), Err(PublishError::Closed));
    }
}
