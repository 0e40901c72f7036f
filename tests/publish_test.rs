/*!
 * Publish Manager Tests
 * Retry behavior against a mocked queue, and publishing into real segments
 */

use mockall::{mock, Sequence};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;
use wsp_events::events::wire::{self, WireRecord};
use wsp_events::{
    EventConfig, EventHeader, EventPublisher, EventQueue, IpcError, IpcResult, OpenMode, PublishError,
    PublishManager, QueueConfig, RetryPolicy, SharedPublisher, SharedQueue, Subscription, TimeoutPolicy,
};

mock! {
    pub Queue {}

    impl EventQueue for Queue {
        fn enqueue(&self, data: &[u8], timeout: TimeoutPolicy) -> IpcResult<()>;
        fn dequeue(&self, timeout: TimeoutPolicy) -> IpcResult<Option<Vec<u8>>>;
        fn size(&self) -> usize;
        fn len(&self) -> usize;
        fn close(&self);
    }
}

fn timeout_error() -> IpcError {
    IpcError::Timeout {
        elapsed_ms: 10,
        timeout_ms: Some(10),
    }
}

fn mock_queue() -> MockQueue {
    let mut queue = MockQueue::new();
    queue.expect_close().returning(|| ());
    queue
}

fn publisher(queue: MockQueue, attempts: u32, pause: Duration) -> PublishManager<MockQueue> {
    PublishManager::with_queue(
        queue,
        TimeoutPolicy::Ipc(Duration::from_millis(10)),
        RetryPolicy::new(attempts, pause),
    )
}

#[test]
fn test_timeout_retried_attempts_plus_one_times() {
    let mut queue = mock_queue();
    queue
        .expect_enqueue()
        .times(4)
        .returning(|_, _| Err(timeout_error()));

    let manager = publisher(queue, 3, Duration::from_millis(20));
    let start = Instant::now();
    let result = manager.publish(b"event");
    let elapsed = start.elapsed();

    match result {
        Err(PublishError::Timeout { attempts, .. }) => assert_eq!(attempts, 4),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(60), "paused too little: {:?}", elapsed);
}

#[test]
fn test_recovers_after_transient_timeouts() {
    let mut queue = mock_queue();
    let mut seq = Sequence::new();
    queue
        .expect_enqueue()
        .times(2)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(timeout_error()));
    queue
        .expect_enqueue()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|data, _| data.to_vec() == b"event")
        .returning(|_, _| Ok(()));

    let manager = publisher(queue, 3, Duration::from_millis(1));
    assert_eq!(manager.publish(b"event"), Ok(()));
}

#[test]
fn test_full_queue_not_retried() {
    let mut queue = mock_queue();
    queue
        .expect_enqueue()
        .times(1)
        .returning(|_, _| Err(IpcError::Full { len: 5, capacity: 5 }));

    let manager = publisher(queue, 3, Duration::from_secs(1));
    let start = Instant::now();
    assert_eq!(
        manager.publish(b"event"),
        Err(PublishError::QueueFull { len: 5, capacity: 5 })
    );
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_empty_record_never_reaches_queue() {
    let mut queue = mock_queue();
    queue.expect_enqueue().times(0);

    let manager = publisher(queue, 3, Duration::from_millis(1));
    assert!(matches!(
        manager.publish(b""),
        Err(PublishError::InvalidArgument(_))
    ));
}

#[test]
fn test_other_queue_errors_wrapped() {
    let mut queue = mock_queue();
    let mut seq = Sequence::new();
    queue
        .expect_enqueue()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(IpcError::Io("broken pipe".into())));
    queue
        .expect_enqueue()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(IpcError::Corrupted("bad cursor".into())));

    let manager = publisher(queue, 3, Duration::from_millis(1));
    assert_eq!(
        manager.publish(b"a"),
        Err(PublishError::ConnectionFailed("broken pipe".into()))
    );
    assert_eq!(
        manager.publish(b"b"),
        Err(PublishError::Queue(IpcError::Corrupted("bad cursor".into())))
    );
}

#[test]
fn test_close_releases_queue_once() {
    let mut queue = MockQueue::new();
    queue.expect_close().times(1).returning(|| ());
    queue.expect_enqueue().times(0);

    let manager = publisher(queue, 0, Duration::ZERO);
    manager.close();
    manager.close();
    assert_eq!(manager.publish(b"late"), Err(PublishError::Closed));
    drop(manager);
}

fn event_config(dir: &TempDir, name: &str) -> EventConfig {
    EventConfig::default()
        .with_queue(
            QueueConfig::new(name)
                .with_directory(dir.path())
                .with_capacity(16),
        )
        .with_timeout(Duration::from_millis(100))
        .with_retry(1, Duration::from_millis(10))
        .with_host_name("publisher-host")
}

#[test]
fn test_open_missing_queue_reports_queue_missing() {
    let dir = TempDir::new().unwrap();
    let mut config = event_config(&dir, "missing");
    config.queue = config.queue.with_open_mode(OpenMode::OpenExisting);

    assert!(matches!(
        PublishManager::open(&config),
        Err(PublishError::QueueMissing(_))
    ));
}

#[test]
fn test_published_records_decode_from_segment() {
    let dir = TempDir::new().unwrap();
    let config = event_config(&dir, "router");
    let manager = PublishManager::open(&config).unwrap();
    let reader = SharedQueue::open(&config.queue).unwrap();

    let event_type = Uuid::new_v4();
    let subscription = Subscription::new(event_type, true);
    manager.publish_subscription(&subscription).unwrap();
    let header = EventHeader::new(event_type, config.host_name.clone());
    manager.publish_event(&header, b"payload bytes").unwrap();

    let first = reader.try_dequeue().unwrap().unwrap();
    assert_eq!(wire::decode(&first).unwrap(), WireRecord::Subscription(subscription));

    let second = reader.try_dequeue().unwrap().unwrap();
    assert_eq!(
        wire::decode(&second).unwrap(),
        WireRecord::Event {
            header,
            payload: b"payload bytes",
        }
    );
}

#[test]
fn test_shared_publisher_lifecycle() {
    let dir = TempDir::new().unwrap();
    let config = event_config(&dir, "shared-pub");
    let reader = SharedQueue::open(&config.queue).unwrap();
    let shared = SharedPublisher::new(config);

    assert!(!shared.is_active());
    let first = shared.acquire().unwrap();
    let second = shared.acquire().unwrap();
    assert_eq!(shared.lease_count(), 2);

    first.publish(b"via first").unwrap();
    second.publish(b"via second").unwrap();
    assert_eq!(reader.len(), 2);

    drop(first);
    assert!(shared.is_active());
    drop(second);
    assert!(!shared.is_active());
    assert_eq!(shared.lease_count(), 0);
}
