/*!
 * Segment Lock
 *
 * Cross-process mutex living inside the shared segment. The lock word holds
 * the pid of the holder; a holder that died while holding the lock is
 * detected through a liveness check and evicted.
 */

use crate::core::types::{current_pid, Pid};
use crate::core::wait::Backoff;
use crate::ipc::core::types::{IpcError, IpcResult};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid as NixPid;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::warn;

const FREE: u32 = 0;

/// Lock word plus acquisition timestamp inside a segment header
pub struct SegmentLock<'a> {
    holder: &'a AtomicU32,
    since: &'a AtomicU64,
    stale_after: Duration,
}

/// Releases the segment lock on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SegmentLockGuard<'a> {
    holder: &'a AtomicU32,
}

impl Drop for SegmentLockGuard<'_> {
    fn drop(&mut self) {
        self.holder.store(FREE, Ordering::Release);
    }
}

impl<'a> SegmentLock<'a> {
    pub fn new(holder: &'a AtomicU32, since: &'a AtomicU64, stale_after: Duration) -> Self {
        Self {
            holder,
            since,
            stale_after,
        }
    }

    /// Single acquisition attempt
    pub fn try_lock(&self) -> Option<SegmentLockGuard<'a>> {
        let me = current_pid();
        self.holder
            .compare_exchange(FREE, me, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| self.acquired())
    }

    /// Acquire, waiting until `deadline` (forever when `None`)
    pub fn lock(&self, deadline: Option<Instant>) -> IpcResult<SegmentLockGuard<'a>> {
        let start = Instant::now();
        let mut backoff = Backoff::default();

        loop {
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }

            let holder = self.holder.load(Ordering::Relaxed);
            if holder != FREE {
                if let Some(guard) = self.try_recover(holder) {
                    return Ok(guard);
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(IpcError::Timeout {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        timeout_ms: Some(deadline.saturating_duration_since(start).as_millis() as u64),
                    });
                }
            }
            backoff.snooze_until(deadline);
        }
    }

    /// Current holder pid, if any
    pub fn holder(&self) -> Option<Pid> {
        match self.holder.load(Ordering::Relaxed) {
            FREE => None,
            pid => Some(pid),
        }
    }

    fn acquired(&self) -> SegmentLockGuard<'a> {
        self.since.store(now_millis(), Ordering::Relaxed);
        SegmentLockGuard {
            holder: self.holder,
        }
    }

    /// Steal the lock from a dead holder once it has been held too long
    fn try_recover(&self, holder: Pid) -> Option<SegmentLockGuard<'a>> {
        let held_ms = now_millis().saturating_sub(self.since.load(Ordering::Relaxed));
        if held_ms < self.stale_after.as_millis() as u64 || pid_alive(holder) {
            return None;
        }

        let me = current_pid();
        match self
            .holder
            .compare_exchange(holder, me, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => {
                warn!(
                    dead_pid = holder,
                    held_ms, "Recovered segment lock from exited process"
                );
                Some(self.acquired())
            }
            Err(_) => None,
        }
    }
}

fn pid_alive(pid: Pid) -> bool {
    match kill(NixPid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM: exists but belongs to someone else
        Err(_) => true,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_excludes_second_taker() {
        let word = AtomicU32::new(0);
        let since = AtomicU64::new(0);
        let lock = SegmentLock::new(&word, &since, Duration::from_secs(5));

        let guard = lock.try_lock().unwrap();
        assert_eq!(lock.holder(), Some(current_pid()));
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert_eq!(lock.holder(), None);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_lock_times_out() {
        let word = AtomicU32::new(0);
        let since = AtomicU64::new(0);
        let lock = SegmentLock::new(&word, &since, Duration::from_secs(5));
        let _guard = lock.try_lock().unwrap();

        let start = Instant::now();
        let result = lock.lock(Some(start + Duration::from_millis(30)));
        assert!(matches!(result, Err(IpcError::Timeout { .. })));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_dead_holder_is_evicted() {
        // Pid far above pid_max on any default kernel config
        let word = AtomicU32::new(0x3FFF_FFF0);
        let since = AtomicU64::new(0);
        let lock = SegmentLock::new(&word, &since, Duration::from_millis(1));

        let guard = lock.lock(Some(Instant::now() + Duration::from_secs(1))).unwrap();
        assert_eq!(lock.holder(), Some(current_pid()));
        drop(guard);
    }

    #[test]
    fn test_lock_serializes_threads() {
        let state = Arc::new((AtomicU32::new(0), AtomicU64::new(0), AtomicU64::new(0)));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let state = Arc::clone(&state);
            handles.push(thread::spawn(move || {
                let lock = SegmentLock::new(&state.0, &state.1, Duration::from_secs(5));
                for _ in 0..500 {
                    let _guard = lock.lock(None).unwrap();
                    // Non-atomic read-modify-write; only correct under the lock
                    let v = state.2.load(Ordering::Relaxed);
                    state.2.store(v + 1, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.2.load(Ordering::Relaxed), 2000);
    }
}
