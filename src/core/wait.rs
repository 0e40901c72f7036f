/*!
 * Adaptive Backoff
 *
 * Spin, then yield, then sleep. Used wherever a thread waits on state that
 * lives in shared memory and therefore cannot be signalled with an
 * in-process condvar.
 */

use std::thread;
use std::time::{Duration, Instant};

const SPIN_STEPS: u32 = 6;
const YIELD_STEPS: u32 = 10;
const MIN_SLEEP: Duration = Duration::from_micros(50);

/// Default cap for a single sleep between polls
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_millis(2);

/// Adaptive backoff state for one wait
#[derive(Debug, Clone)]
pub struct Backoff {
    step: u32,
    max_sleep: Duration,
}

impl Backoff {
    pub fn new(max_sleep: Duration) -> Self {
        Self { step: 0, max_sleep }
    }

    /// Restart from the spinning phase
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// True once the backoff has moved past spinning and yielding
    pub fn is_sleeping(&self) -> bool {
        self.step > YIELD_STEPS
    }

    /// Wait one step, never sleeping past `deadline`
    pub fn snooze_until(&mut self, deadline: Option<Instant>) {
        if self.step <= SPIN_STEPS {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step <= YIELD_STEPS {
            thread::yield_now();
        } else {
            let exp = (self.step - YIELD_STEPS).min(8);
            let mut nap = (MIN_SLEEP * (1u32 << exp)).min(self.max_sleep);
            if let Some(deadline) = deadline {
                nap = nap.min(deadline.saturating_duration_since(Instant::now()));
            }
            if !nap.is_zero() {
                thread::sleep(nap);
            }
        }
        self.step = self.step.saturating_add(1);
    }

    /// Wait one step with no deadline
    pub fn snooze(&mut self) {
        self.snooze_until(None);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progresses_to_sleep() {
        let mut backoff = Backoff::default();
        assert!(!backoff.is_sleeping());
        for _ in 0..=YIELD_STEPS {
            backoff.snooze();
        }
        assert!(backoff.is_sleeping());
        backoff.reset();
        assert!(!backoff.is_sleeping());
    }

    #[test]
    fn test_snooze_respects_deadline() {
        let mut backoff = Backoff::new(Duration::from_secs(1));
        for _ in 0..=YIELD_STEPS {
            backoff.snooze();
        }
        let start = Instant::now();
        backoff.snooze_until(Some(start + Duration::from_millis(5)));
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
