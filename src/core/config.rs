/*!
 * Event Transport Configuration
 *
 * Runtime settings for queues, publishers and subscription managers.
 * Defaults match the well-known tunables; `from_env` overlays `WSP_*`
 * environment variables.
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use super::timeout::TimeoutPolicy;
use super::types::local_host_name;

/// Well-known queue shared by every producer and consumer on a host
pub const DEFAULT_QUEUE_NAME: &str = "WspEventQueue";

/// Maximum number of records held by a queue
pub const DEFAULT_QUEUE_CAPACITY: u32 = 100;

/// Size of the record ring inside the shared segment (1MB)
pub const DEFAULT_QUEUE_BYTES: usize = 1024 * 1024;

/// Enqueue/dequeue timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Extra publish attempts after a timeout
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Pause between publish attempts
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(1_000);

/// Period at which active subscriptions are republished
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(180);

/// How long shutdown waits for a listener thread
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(15);

/// How long an opener waits for a creator to finish initializing a segment
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lock hold time after which a dead holder may be evicted
pub const DEFAULT_STALE_LOCK: Duration = Duration::from_secs(5);

/// Worker threads running user callbacks
pub const DEFAULT_DISPATCH_WORKERS: usize = 4;

/// How a queue handle is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Create the segment when missing, otherwise attach to it
    #[default]
    CreateOrOpen,
    /// Attach only; a missing segment is `QueueDoesNotExist`
    OpenExisting,
}

/// What to do when an existing segment has a different capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Attach with the capacity the creator chose
    #[default]
    UseExisting,
    /// Fail with `InitializationFailed`
    Strict,
}

/// Listener reaction to a queue fault other than closure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum ListenerFaultPolicy {
    /// Report the fault and end the listener
    Stop,
    /// Report the fault, pause, keep listening
    Retry {
        #[serde(with = "millis")]
        pause: Duration,
    },
}

impl Default for ListenerFaultPolicy {
    fn default() -> Self {
        Self::Retry {
            pause: Duration::from_secs(1),
        }
    }
}

/// Shared queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub capacity: u32,
    pub data_bytes: usize,
    pub directory: PathBuf,
    pub open_mode: OpenMode,
    pub capacity_policy: CapacityPolicy,
    #[serde(with = "millis")]
    pub init_timeout: Duration,
    #[serde(with = "millis")]
    pub stale_lock_after: Duration,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_data_bytes(mut self, data_bytes: usize) -> Self {
        self.data_bytes = data_bytes;
        self
    }

    pub fn with_open_mode(mut self, open_mode: OpenMode) -> Self {
        self.open_mode = open_mode;
        self
    }

    pub fn with_capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.capacity_policy = policy;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            capacity: DEFAULT_QUEUE_CAPACITY,
            data_bytes: DEFAULT_QUEUE_BYTES,
            directory: default_segment_dir(),
            open_mode: OpenMode::default(),
            capacity_policy: CapacityPolicy::default(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            stale_lock_after: DEFAULT_STALE_LOCK,
        }
    }
}

/// Full configuration for publishers and subscription managers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    pub queue: QueueConfig,
    #[serde(with = "millis")]
    pub timeout: Duration,
    pub retry_attempts: u32,
    #[serde(with = "millis")]
    pub retry_pause: Duration,
    #[serde(with = "millis")]
    pub refresh_interval: Duration,
    #[serde(with = "millis")]
    pub join_timeout: Duration,
    pub dispatch_workers: usize,
    pub host_name: String,
    pub fault_policy: ListenerFaultPolicy,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_pause: DEFAULT_RETRY_PAUSE,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            dispatch_workers: DEFAULT_DISPATCH_WORKERS,
            host_name: local_host_name(),
            fault_policy: ListenerFaultPolicy::default(),
        }
    }
}

impl EventConfig {
    /// Defaults overlaid with `WSP_*` environment variables.
    ///
    /// Environment variables:
    /// - WSP_QUEUE_NAME, WSP_QUEUE_DIR
    /// - WSP_QUEUE_CAPACITY (records), WSP_QUEUE_BYTES (ring size)
    /// - WSP_TIMEOUT_MS, WSP_RETRY_ATTEMPTS, WSP_RETRY_PAUSE_MS
    /// - WSP_REFRESH_SECS, WSP_DISPATCH_WORKERS, WSP_HOST_NAME
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("WSP_QUEUE_NAME") {
            config.queue.name = name;
        }
        if let Ok(dir) = std::env::var("WSP_QUEUE_DIR") {
            config.queue.directory = PathBuf::from(dir);
        }
        if let Some(capacity) = env_parse("WSP_QUEUE_CAPACITY") {
            config.queue.capacity = capacity;
        }
        if let Some(bytes) = env_parse("WSP_QUEUE_BYTES") {
            config.queue.data_bytes = bytes;
        }
        if let Some(ms) = env_parse("WSP_TIMEOUT_MS") {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse("WSP_RETRY_ATTEMPTS") {
            config.retry_attempts = attempts;
        }
        if let Some(ms) = env_parse("WSP_RETRY_PAUSE_MS") {
            config.retry_pause = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse("WSP_REFRESH_SECS") {
            config.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(workers) = env_parse("WSP_DISPATCH_WORKERS") {
            config.dispatch_workers = workers;
        }
        if let Ok(host) = std::env::var("WSP_HOST_NAME") {
            config.host_name = host;
        }
        config
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, pause: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_pause = pause;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_dispatch_workers(mut self, workers: usize) -> Self {
        self.dispatch_workers = workers.max(1);
        self
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn with_fault_policy(mut self, policy: ListenerFaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    /// Queue operation timeout as a policy
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::from(self.timeout)
    }
}

/// `/dev/shm` when the host has it, otherwise the temp directory
pub fn default_segment_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm
    } else {
        std::env::temp_dir()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment setting");
            None
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn test_defaults_match_tunables() {
        let config = EventConfig::default();
        assert_eq!(config.queue.name, "WspEventQueue");
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.timeout, Duration::from_millis(10_000));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_pause, Duration::from_millis(1_000));
        assert_eq!(config.refresh_interval, Duration::from_secs(180));
    }

    #[test]
    #[serial]
    fn test_from_env_overlays_values() {
        std::env::set_var("WSP_QUEUE_NAME", "EnvQueue");
        std::env::set_var("WSP_RETRY_ATTEMPTS", "7");
        std::env::set_var("WSP_TIMEOUT_MS", "not-a-number");
        let config = EventConfig::from_env();
        std::env::remove_var("WSP_QUEUE_NAME");
        std::env::remove_var("WSP_RETRY_ATTEMPTS");
        std::env::remove_var("WSP_TIMEOUT_MS");

        assert_eq!(config.queue.name, "EnvQueue");
        assert_eq!(config.retry_attempts, 7);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_json_uses_millis() {
        let config = EventConfig::default().with_timeout(Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 250);
        assert_eq!(json["fault_policy"]["policy"], "retry");

        let back: EventConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
