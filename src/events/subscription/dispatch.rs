/*!
 * Dispatch Pool
 * Worker threads running callbacks so the listener never blocks on them
 */

use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of workers fed from an unbounded channel
///
/// Shutting down closes the channel; workers finish queued jobs and exit.
/// They are not joined, so a stuck callback cannot block disposal.
pub struct DispatchPool {
    sender: Mutex<Option<flume::Sender<Job>>>,
    workers: usize,
    completed: Arc<AtomicU64>,
}

impl DispatchPool {
    pub fn new(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let (sender, receiver) = flume::unbounded::<Job>();
        let completed = Arc::new(AtomicU64::new(0));

        for index in 0..workers {
            let receiver = receiver.clone();
            let completed = Arc::clone(&completed);
            thread::Builder::new()
                .name(format!("wsp-dispatch-{}", index))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(worker = index, "Dispatched job panicked");
                        }
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!(worker = index, "Dispatch worker exiting");
                })?;
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers,
            completed,
        })
    }

    /// Queue a job; `false` once the pool is shut down
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            debug!(workers = self.workers, "Dispatch pool shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs finished so far, panicked ones included
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for(pool: &DispatchPool, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.completed() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_jobs_run_off_thread() {
        let pool = DispatchPool::new(2).unwrap();
        let (tx, rx) = flume::unbounded();
        let caller = thread::current().id();
        for i in 0..8 {
            let tx = tx.clone();
            assert!(pool.dispatch(move || tx.send((i, thread::current().id())).unwrap()));
        }
        let mut seen: Vec<_> = (0..8)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(seen.iter().all(|(_, id)| *id != caller));
        seen.sort_by_key(|(i, _)| *i);
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = DispatchPool::new(1).unwrap();
        pool.dispatch(|| panic!("callback blew up"));
        let (tx, rx) = flume::bounded(1);
        pool.dispatch(move || tx.send(()).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        wait_for(&pool, 2);
        assert_eq!(pool.completed(), 2);
    }

    #[test]
    fn test_dispatch_after_shutdown_refused() {
        let pool = DispatchPool::new(1).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert!(!pool.dispatch(|| {}));
    }
}
