/*!
 * wspq - Event Queue Tool
 *
 * Inspects and drives the shared event queue configured through `WSP_*`
 * environment variables:
 * - stat                      queue geometry and occupancy as JSON
 * - create                    create the segment if missing
 * - remove                    delete the segment
 * - drain                     dequeue and print every pending record
 * - publish <type> <text>     publish one event
 * - listen <type> [secs]      subscribe and print deliveries
 */

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;
use wsp_events::events::wire::{self, WireRecord};
use wsp_events::{
    init_tracing, EventConfig, EventHeader, EventPublisher, OperationSpan, PublishManager, SharedPublisher, SharedQueue,
    SubscriptionManager,
};

const USAGE: &str = "usage: wspq <stat|create|remove|drain|publish <event-type> <text>|listen <event-type> [secs]>";

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = EventConfig::from_env();

    match args.first().map(String::as_str) {
        Some("stat") => stat(&config),
        Some("create") => create(&config),
        Some("remove") => remove(&config),
        Some("drain") => drain(&config),
        Some("publish") => {
            let (Some(event_type), Some(text)) = (args.get(1), args.get(2)) else {
                bail!(USAGE);
            };
            publish(&config, parse_event_type(event_type)?, text)
        }
        Some("listen") => {
            let Some(event_type) = args.get(1) else {
                bail!(USAGE);
            };
            let secs = match args.get(2) {
                Some(secs) => secs.parse().context("listen duration must be whole seconds")?,
                None => 30,
            };
            listen(config, parse_event_type(event_type)?, Duration::from_secs(secs))
        }
        _ => bail!(USAGE),
    }
}

fn parse_event_type(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid event type id: {}", raw))
}

fn stat(config: &EventConfig) -> Result<()> {
    let _span = OperationSpan::new("stat", &config.queue.name);
    let queue = SharedQueue::open(&config.queue)?;
    println!("{}", serde_json::to_string_pretty(&queue.stats())?);
    Ok(())
}

fn create(config: &EventConfig) -> Result<()> {
    let _span = OperationSpan::new("create", &config.queue.name);
    let existed = SharedQueue::exists(&config.queue.directory, &config.queue.name);
    let queue = SharedQueue::open(&config.queue)?;
    info!(queue = queue.name(), existed, capacity = queue.capacity(), "Queue ready");
    Ok(())
}

fn remove(config: &EventConfig) -> Result<()> {
    let _span = OperationSpan::new("remove", &config.queue.name);
    SharedQueue::remove(&config.queue.directory, &config.queue.name)?;
    Ok(())
}

fn drain(config: &EventConfig) -> Result<()> {
    let span = OperationSpan::new("drain", &config.queue.name);
    let queue = SharedQueue::open(&config.queue)?;

    let mut drained = 0;
    while let Some(record) = queue.try_dequeue()? {
        drained += 1;
        match wire::decode(&record) {
            Ok(WireRecord::Subscription(sub)) => println!(
                "subscription type={} id={} subscribe={} local_only={}",
                sub.event_type, sub.subscription_id, sub.subscribe, sub.local_only
            ),
            Ok(WireRecord::Event { header, payload }) => println!(
                "event type={} origin={} last_hop={} payload={}",
                header.event_type,
                header.originating_router,
                header.last_hop_router,
                String::from_utf8_lossy(payload)
            ),
            Err(err) => println!("raw len={} ({})", record.len(), err),
        }
    }
    span.record_records(drained);
    Ok(())
}

fn publish(config: &EventConfig, event_type: Uuid, text: &str) -> Result<()> {
    let _span = OperationSpan::new("publish", &config.queue.name);
    let publisher = PublishManager::open(config)?;
    let header = EventHeader::new(event_type, config.host_name.clone());
    publisher.publish_event(&header, text.as_bytes())?;
    info!(%event_type, bytes = text.len(), "Event published");
    Ok(())
}

fn listen(config: EventConfig, event_type: Uuid, duration: Duration) -> Result<()> {
    let publishers = SharedPublisher::new(config.clone());
    let manager = SubscriptionManager::new(config, &publishers, |event_type, payload| {
        println!("{} {}", event_type, String::from_utf8_lossy(&payload));
    })?;
    manager.on_fault(|fault| eprintln!("fault: {:?}", fault));

    manager.add_subscription(event_type, false)?;
    std::thread::sleep(duration);
    manager.dispose();
    Ok(())
}
