/*!
 * Core Types
 * Common identifiers used across the event transport
 */

use uuid::Uuid;

/// Process ID type
pub type Pid = u32;

/// 128-bit identifier of an event type
pub type EventTypeId = Uuid;

/// 128-bit identifier of one subscription request, fresh per add
pub type SubscriptionId = Uuid;

/// Fallback used when the OS refuses to report a host name
pub const UNKNOWN_HOST: &str = "localhost";

/// Current process ID
#[inline]
#[must_use]
pub fn current_pid() -> Pid {
    std::process::id()
}

/// Host name of this machine, used as the local router name
pub fn local_host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}
