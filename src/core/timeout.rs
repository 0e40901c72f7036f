/*!
 * Timeout Policy
 *
 * Deadline handling shared by every blocking queue operation.
 *
 * ## Timeout Classes
 *
 * - **NoWait**: fail immediately instead of blocking
 * - **Lock**: short waits for the in-segment lock
 * - **Ipc**: enqueue/dequeue waits (default 10s)
 * - **Infinite**: block until the operation completes - use sparingly!
 */

use std::time::{Duration, Instant};

/// Timeout policy for blocking operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Do not wait at all
    NoWait,

    /// Lock acquisition timeout (1-100ms)
    Lock(Duration),

    /// Queue operation timeout
    Ipc(Duration),

    /// No timeout (infinite wait)
    #[default]
    Infinite,
}

impl TimeoutPolicy {
    /// Default lock timeout: 50ms
    pub const fn default_lock() -> Self {
        Self::Lock(Duration::from_millis(50))
    }

    /// Default queue operation timeout: 10s
    pub const fn default_ipc() -> Self {
        Self::Ipc(Duration::from_secs(10))
    }

    /// Queue timeout from a millisecond count; zero means no wait
    pub const fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self::NoWait
        } else {
            Self::Ipc(Duration::from_millis(ms))
        }
    }

    /// Get the duration for this policy, `None` when unbounded
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::NoWait => Some(Duration::ZERO),
            Self::Lock(d) | Self::Ipc(d) => Some(*d),
            Self::Infinite => None,
        }
    }

    /// Duration in whole milliseconds for error reporting
    pub fn as_millis(&self) -> Option<u64> {
        self.duration().map(|d| d.as_millis() as u64)
    }

    /// Absolute deadline when started at `start`
    pub fn deadline(&self, start: Instant) -> Option<Instant> {
        self.duration().map(|d| start + d)
    }

    /// Check if this timeout has expired
    pub fn is_expired(&self, start: Instant) -> bool {
        match self.duration() {
            None => false,
            Some(d) => start.elapsed() >= d,
        }
    }

    /// Get remaining time before timeout
    pub fn remaining(&self, start: Instant) -> Option<Duration> {
        self.duration()
            .map(|d| d.saturating_sub(start.elapsed()))
    }

    /// Get timeout category as string
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoWait => "no_wait",
            Self::Lock(_) => "lock",
            Self::Ipc(_) => "ipc",
            Self::Infinite => "infinite",
        }
    }
}

impl From<Duration> for TimeoutPolicy {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Self::NoWait
        } else {
            Self::Ipc(d)
        }
    }
}
