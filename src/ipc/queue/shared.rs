/*!
 * Shared Queue
 *
 * Named, bounded FIFO of byte records in a shared segment. Any number of
 * processes may open the same name; all of them see one total order of
 * records.
 */

use super::ring::{self, RingCursor};
use super::types::QueueStats;
use crate::core::config::{CapacityPolicy, QueueConfig};
use crate::core::timeout::TimeoutPolicy;
use crate::core::wait::Backoff;
use crate::ipc::core::traits::EventQueue;
use crate::ipc::core::types::{IpcError, IpcResult};
use crate::ipc::shm::{QueueHeader, SegmentLock, SegmentLockGuard, SharedSegment};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one locked attempt at an operation
enum Attempt<T> {
    Done(T),
    /// Could not proceed; carries the record count and sequence observed
    Blocked { len: u32, sequence: u64 },
}

/// Outcome of a waiting operation
enum Outcome<T> {
    Done(T),
    /// Gave up: no-wait policy or deadline passed
    Expired { len: u32, elapsed_ms: u64 },
}

/// Handle to a named shared queue
pub struct SharedQueue {
    segment: SharedSegment,
    capacity: u32,
    stale_lock_after: Duration,
    closed: AtomicBool,
}

impl SharedQueue {
    /// Open or create the queue described by `config`
    pub fn open(config: &QueueConfig) -> IpcResult<Self> {
        let segment = SharedSegment::create_or_open(config)?;
        let capacity = segment.header().capacity.load(Ordering::Acquire);

        if !segment.was_created() && capacity != config.capacity {
            match config.capacity_policy {
                CapacityPolicy::Strict => {
                    return Err(IpcError::InitializationFailed(format!(
                        "Queue {} has capacity {}, requested {}",
                        config.name, capacity, config.capacity
                    )))
                }
                CapacityPolicy::UseExisting => warn!(
                    queue = %config.name,
                    existing = capacity,
                    requested = config.capacity,
                    "Queue already exists with a different capacity; using existing"
                ),
            }
        }

        info!(
            queue = %config.name,
            capacity,
            created = segment.was_created(),
            "Opened shared queue"
        );
        Ok(Self {
            segment,
            capacity,
            stale_lock_after: config.stale_lock_after,
            closed: AtomicBool::new(false),
        })
    }

    /// Delete the named queue's segment.
    ///
    /// Handles that are already open keep working on the unlinked segment;
    /// the next `open` creates a fresh one.
    pub fn remove(dir: &Path, name: &str) -> IpcResult<()> {
        SharedSegment::remove(dir, name)
    }

    pub fn exists(dir: &Path, name: &str) -> bool {
        SharedSegment::exists(dir, name)
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Maximum record count, fixed at creation
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Ring size in bytes
    pub fn data_capacity(&self) -> usize {
        self.segment.data_len()
    }

    /// Largest record this queue accepts
    pub fn max_record_len(&self) -> usize {
        ring::max_record_len(self.segment.data_len())
    }

    /// Append a record, waiting up to `timeout` for room
    pub fn enqueue(&self, data: &[u8], timeout: TimeoutPolicy) -> IpcResult<()> {
        self.validate_record(data)?;
        let capacity = self.capacity;

        let outcome = self.wait_for(timeout, |ring_bytes, cursor, sequence| {
            if cursor.count < capacity && cursor.fits(ring_bytes.len(), data.len()) {
                ring::push(ring_bytes, cursor, data);
                Ok(Attempt::Done(()))
            } else {
                Ok(Attempt::Blocked {
                    len: cursor.count,
                    sequence,
                })
            }
        })?;

        match outcome {
            Outcome::Done(()) => {
                debug!(queue = %self.name(), bytes = data.len(), "Enqueued record");
                Ok(())
            }
            Outcome::Expired { len, .. } if timeout == TimeoutPolicy::NoWait => Err(IpcError::Full {
                len,
                capacity: self.capacity,
            }),
            Outcome::Expired { elapsed_ms, .. } => Err(IpcError::Timeout {
                elapsed_ms,
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    /// Append without waiting; `Full` when there is no room
    pub fn try_enqueue(&self, data: &[u8]) -> IpcResult<()> {
        self.enqueue(data, TimeoutPolicy::NoWait)
    }

    /// Remove the head record, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses on an empty queue.
    pub fn dequeue(&self, timeout: TimeoutPolicy) -> IpcResult<Option<Vec<u8>>> {
        let result = self.wait_for(timeout, |ring_bytes, cursor, sequence| {
            match ring::pop(ring_bytes, cursor)? {
                Some(record) => Ok(Attempt::Done(record)),
                None => Ok(Attempt::Blocked { len: 0, sequence }),
            }
        });

        match result {
            Ok(Outcome::Done(record)) => {
                debug!(queue = %self.name(), bytes = record.len(), "Dequeued record");
                Ok(Some(record))
            }
            Ok(Outcome::Expired { .. }) => Ok(None),
            // Lock contention past the deadline reads as an empty poll
            Err(IpcError::Timeout { .. }) if self.is_open() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove the head record without waiting
    pub fn try_dequeue(&self) -> IpcResult<Option<Vec<u8>>> {
        self.dequeue(TimeoutPolicy::NoWait)
    }

    /// Occupied bytes; advisory
    pub fn size(&self) -> usize {
        self.segment.header().used.load(Ordering::Relaxed) as usize
    }

    /// Records queued; advisory
    pub fn len(&self) -> usize {
        self.segment.header().count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the queue's counters
    pub fn stats(&self) -> QueueStats {
        let header = self.segment.header();
        QueueStats {
            name: self.name().to_string(),
            path: self.segment.path().to_path_buf(),
            capacity: self.capacity,
            length: header.count.load(Ordering::Relaxed),
            used_bytes: header.used.load(Ordering::Relaxed) as usize,
            data_bytes: self.segment.data_len(),
            sequence: header.sequence.load(Ordering::Relaxed),
            lock_holder: self.segment_lock().holder(),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }

    /// Release this handle. Other handles, in this or other processes,
    /// are unaffected; the segment itself persists.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(queue = %self.name(), "Closed shared queue handle");
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> IpcResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(IpcError::Closed(self.name().to_string()))
        }
    }

    fn validate_record(&self, data: &[u8]) -> IpcResult<()> {
        if data.is_empty() {
            return Err(IpcError::InvalidArgument("Empty record".into()));
        }
        if data.len() > self.max_record_len() || data.len() > u32::MAX as usize {
            return Err(IpcError::InvalidArgument(format!(
                "Record of {} bytes exceeds queue limit of {}",
                data.len(),
                self.max_record_len()
            )));
        }
        Ok(())
    }

    fn segment_lock(&self) -> SegmentLock<'_> {
        let header = self.segment.header();
        SegmentLock::new(&header.lock, &header.lock_since, self.stale_lock_after)
    }

    fn lock(&self, deadline: Option<Instant>) -> IpcResult<SegmentLockGuard<'_>> {
        self.segment_lock().lock(deadline)
    }

    /// Run `op` against the ring under the segment lock, publishing the
    /// cursor back to the header if it changed.
    fn locked<T>(
        &self,
        deadline: Option<Instant>,
        op: impl FnOnce(&mut [u8], &mut RingCursor, u64) -> IpcResult<Attempt<T>>,
    ) -> IpcResult<Attempt<T>> {
        let _guard = self.lock(deadline)?;
        let header = self.segment.header();
        let ring_len = self.segment.data_len();
        let before = load_cursor(header);
        before.validate(ring_len)?;

        let mut cursor = before;
        let sequence = header.sequence.load(Ordering::Relaxed);
        // SAFETY: the segment lock is held for the lifetime of `ring_bytes`
        let ring_bytes = unsafe { self.segment.ring() };
        let attempt = op(ring_bytes, &mut cursor, sequence)?;

        if cursor != before {
            store_cursor(header, &cursor);
            header.sequence.fetch_add(1, Ordering::Release);
        }
        Ok(attempt)
    }

    /// Retry `op` until it completes, the policy says not to wait, or the
    /// deadline passes.
    fn wait_for<T>(
        &self,
        timeout: TimeoutPolicy,
        mut op: impl FnMut(&mut [u8], &mut RingCursor, u64) -> IpcResult<Attempt<T>>,
    ) -> IpcResult<Outcome<T>> {
        let start = Instant::now();
        let deadline = timeout.deadline(start);
        let lock_deadline = match timeout {
            TimeoutPolicy::NoWait => TimeoutPolicy::default_lock().deadline(start),
            _ => deadline,
        };
        let mut backoff = Backoff::default();

        loop {
            self.ensure_open()?;
            let (len, observed) = match self.locked(lock_deadline, &mut op)? {
                Attempt::Done(value) => return Ok(Outcome::Done(value)),
                Attempt::Blocked { len, sequence } => (len, sequence),
            };

            // Poll the sequence until another handle changes the queue
            backoff.reset();
            loop {
                let expired = deadline.map_or(false, |d| Instant::now() >= d);
                if expired {
                    return Ok(Outcome::Expired {
                        len,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    });
                }
                self.ensure_open()?;
                if self.segment.header().sequence.load(Ordering::Acquire) != observed {
                    break;
                }
                backoff.snooze_until(deadline);
            }
        }
    }
}

fn load_cursor(header: &QueueHeader) -> RingCursor {
    RingCursor {
        head: header.head.load(Ordering::Relaxed) as usize,
        tail: header.tail.load(Ordering::Relaxed) as usize,
        used: header.used.load(Ordering::Relaxed) as usize,
        count: header.count.load(Ordering::Relaxed),
    }
}

fn store_cursor(header: &QueueHeader, cursor: &RingCursor) {
    header.head.store(cursor.head as u64, Ordering::Relaxed);
    header.tail.store(cursor.tail as u64, Ordering::Relaxed);
    header.used.store(cursor.used as u64, Ordering::Relaxed);
    header.count.store(cursor.count, Ordering::Relaxed);
}

impl EventQueue for SharedQueue {
    fn enqueue(&self, data: &[u8], timeout: TimeoutPolicy) -> IpcResult<()> {
        SharedQueue::enqueue(self, data, timeout)
    }

    fn dequeue(&self, timeout: TimeoutPolicy) -> IpcResult<Option<Vec<u8>>> {
        SharedQueue::dequeue(self, timeout)
    }

    fn size(&self) -> usize {
        SharedQueue::size(self)
    }

    fn len(&self) -> usize {
        SharedQueue::len(self)
    }

    fn close(&self) {
        SharedQueue::close(self)
    }
}

impl Drop for SharedQueue {
    fn drop(&mut self) {
        debug!(queue = %self.name(), "Unmapping shared queue handle");
    }
}
