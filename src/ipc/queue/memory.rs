/*!
 * Memory Queue
 * In-process bounded FIFO with the same contract as the shared queue
 */

use crate::core::timeout::TimeoutPolicy;
use crate::ipc::core::traits::EventQueue;
use crate::ipc::core::types::{IpcError, IpcResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;

struct MemoryState {
    records: VecDeque<Vec<u8>>,
    bytes: usize,
    closed: bool,
}

/// Bounded FIFO for components living in one process
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records: VecDeque::with_capacity(capacity.min(1024)),
                bytes: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EventQueue for MemoryQueue {
    fn enqueue(&self, data: &[u8], timeout: TimeoutPolicy) -> IpcResult<()> {
        if data.is_empty() {
            return Err(IpcError::InvalidArgument("Empty record".into()));
        }
        let start = Instant::now();
        let deadline = timeout.deadline(start);
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(IpcError::Closed("Memory queue closed".into()));
            }
            if state.records.len() < self.capacity {
                state.bytes += data.len();
                state.records.push_back(data.to_vec());
                self.not_empty.notify_one();
                return Ok(());
            }
            match (timeout, deadline) {
                (TimeoutPolicy::NoWait, _) => {
                    return Err(IpcError::Full {
                        len: state.records.len() as u32,
                        capacity: self.capacity as u32,
                    })
                }
                (_, Some(deadline)) => {
                    if self.not_full.wait_until(&mut state, deadline).timed_out()
                        && state.records.len() >= self.capacity
                    {
                        return Err(IpcError::Timeout {
                            elapsed_ms: start.elapsed().as_millis() as u64,
                            timeout_ms: timeout.as_millis(),
                        });
                    }
                }
                (_, None) => self.not_full.wait(&mut state),
            }
        }
    }

    fn dequeue(&self, timeout: TimeoutPolicy) -> IpcResult<Option<Vec<u8>>> {
        let deadline = timeout.deadline(Instant::now());
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(IpcError::Closed("Memory queue closed".into()));
            }
            if let Some(record) = state.records.pop_front() {
                state.bytes -= record.len();
                self.not_full.notify_one();
                return Ok(Some(record));
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline
                        || (self.not_empty.wait_until(&mut state, deadline).timed_out()
                            && state.records.is_empty())
                    {
                        return Ok(None);
                    }
                }
                None => self.not_empty.wait(&mut state),
            }
        }
    }

    fn size(&self) -> usize {
        self.state.lock().bytes
    }

    fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order_and_size() {
        let queue = MemoryQueue::new(4);
        queue.try_enqueue(b"one").unwrap();
        queue.try_enqueue(b"three").unwrap();
        assert_eq!(queue.size(), 8);
        assert_eq!(queue.try_dequeue().unwrap().unwrap(), b"one");
        assert_eq!(queue.try_dequeue().unwrap().unwrap(), b"three");
        assert_eq!(queue.try_dequeue().unwrap(), None);
    }

    #[test]
    fn test_full_versus_timeout() {
        let queue = MemoryQueue::new(1);
        queue.try_enqueue(b"a").unwrap();
        assert!(matches!(queue.try_enqueue(b"b"), Err(IpcError::Full { .. })));
        let result = queue.enqueue(b"b", TimeoutPolicy::Ipc(Duration::from_millis(20)));
        assert!(matches!(result, Err(IpcError::Timeout { .. })));
    }

    #[test]
    fn test_blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::new(4));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.try_enqueue(b"late").unwrap();
        });
        let record = queue.dequeue(TimeoutPolicy::Ipc(Duration::from_secs(5))).unwrap();
        assert_eq!(record.unwrap(), b"late");
        handle.join().unwrap();
    }

    #[test]
    fn test_close_wakes_waiters() {
        let queue = Arc::new(MemoryQueue::new(1));
        let closer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        let result = queue.dequeue(TimeoutPolicy::Infinite);
        assert!(matches!(result, Err(IpcError::Closed(_))));
        handle.join().unwrap();
    }
}
