//! Integration tests for `EventConsumer`: delivery, retries, dead letters and
//! shutdown, over the in-memory event bus.

#![allow(clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use flightdeck_core::event::{Event, SerializedEvent};
use flightdeck_core::event_bus::EventBus;
use flightdeck_runtime::consumer::{HandlerError, IncompleteConsumer};
use flightdeck_runtime::{DeadLetterQueue, EventConsumer, EventHandler, RetryPolicy};
use flightdeck_runtime::in_memory::InMemoryEventBus;
use flightdeck_testing::eventually;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

const TOPIC: &str = "runway-events";
const SETTLE: Duration = Duration::from_secs(2);

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RunwayClosed {
    runway: String,
}

impl Event for RunwayClosed {
    fn event_type(&self) -> &'static str {
        "RunwayClosed.v1"
    }
}

fn closed(runway: &str) -> SerializedEvent {
    SerializedEvent::from_event(
        &RunwayClosed {
            runway: runway.to_string(),
        },
        None,
    )
    .expect("event encodes")
}

/// Records runways it has seen; fails every attempt while `failing` is set.
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingHandler {
    fn failing() -> Self {
        let handler = Self::default();
        handler.failing.store(true, Ordering::SeqCst);
        handler
    }

    async fn seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err("runway database offline".into());
        }
        let event: RunwayClosed = event.decode()?;
        self.seen.lock().await.push(event.runway);
        Ok(())
    }
}

fn fast_retries(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter(false)
        .build()
}

async fn start_consumer(
    bus: &Arc<InMemoryEventBus>,
    handler: &Arc<RecordingHandler>,
    policy: RetryPolicy,
) -> (
    DeadLetterQueue<SerializedEvent>,
    broadcast::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let consumer = EventConsumer::builder()
        .name("runway-log")
        .topics(vec![TOPIC.to_string()])
        .event_bus(Arc::clone(bus) as Arc<dyn EventBus>)
        .handler(Arc::clone(handler) as Arc<dyn EventHandler>)
        .shutdown(shutdown_rx)
        .retry_policy(policy)
        .reconnect_delay(Duration::from_millis(5))
        .build()
        .expect("consumer builds");
    let dead_letters = consumer.dead_letters();
    let task = consumer.start().await.expect("consumer subscribes");
    (dead_letters, shutdown_tx, task)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn delivers_events_in_publish_order() {
    let bus = Arc::new(InMemoryEventBus::new());
    let handler = Arc::new(RecordingHandler::default());
    let (dead_letters, _shutdown, _task) = start_consumer(&bus, &handler, fast_retries(2)).await;

    for runway in ["09L", "27R", "18"] {
        bus.publish(TOPIC, &closed(runway)).await.expect("publish");
    }
    bus.publish("other-topic", &closed("04")).await.expect("publish");

    let handler_ref = &handler;
    assert!(eventually(SETTLE, move || async move { handler_ref.seen().await.len() == 3 }).await);
    assert_eq!(handler.seen().await, vec!["09L", "27R", "18"]);
    assert!(dead_letters.is_empty());
}

#[tokio::test]
async fn exhausted_retries_park_the_event() {
    let bus = Arc::new(InMemoryEventBus::new());
    let handler = Arc::new(RecordingHandler::failing());
    let (dead_letters, _shutdown, _task) = start_consumer(&bus, &handler, fast_retries(2)).await;

    bus.publish(TOPIC, &closed("09L")).await.expect("publish");

    let queue = &dead_letters;
    assert!(eventually(SETTLE, move || async move { queue.len() == 1 }).await);
    // One attempt plus two retries.
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);

    let parked = dead_letters.peek().expect("entry parked");
    assert_eq!(parked.retry_count, 2);
    assert!(parked.error_message.contains("offline"));
    assert_eq!(parked.payload.event_type, "RunwayClosed.v1");
}

#[tokio::test]
async fn redrive_delivers_parked_events_once_fixed() {
    let bus = Arc::new(InMemoryEventBus::new());
    let handler = Arc::new(RecordingHandler::failing());
    let policy = fast_retries(1);
    let (dead_letters, _shutdown, _task) = start_consumer(&bus, &handler, policy.clone()).await;

    bus.publish(TOPIC, &closed("09L")).await.expect("publish");
    bus.publish(TOPIC, &closed("27R")).await.expect("publish");
    let queue = &dead_letters;
    assert!(eventually(SETTLE, move || async move { queue.len() == 2 }).await);

    // Still failing: everything goes back into the queue.
    assert_eq!(EventConsumer::redrive(handler.as_ref(), &dead_letters, &policy).await, 0);
    assert_eq!(dead_letters.len(), 2);

    handler.failing.store(false, Ordering::SeqCst);
    let delivered = EventConsumer::redrive(handler.as_ref(), &dead_letters, &policy).await;

    assert_eq!(delivered, 2);
    assert!(dead_letters.is_empty());
    assert_eq!(handler.seen().await, vec!["09L", "27R"]);
}

#[tokio::test]
async fn duplicate_delivery_reaches_the_handler_twice() {
    let bus = Arc::new(InMemoryEventBus::new().with_duplicate_delivery());
    let handler = Arc::new(RecordingHandler::default());
    let (_dead_letters, _shutdown, _task) = start_consumer(&bus, &handler, fast_retries(0)).await;

    bus.publish(TOPIC, &closed("09L")).await.expect("publish");

    let handler_ref = &handler;
    assert!(eventually(SETTLE, move || async move { handler_ref.seen().await.len() == 2 }).await);
    assert_eq!(handler.seen().await, vec!["09L", "09L"]);
}

#[tokio::test]
async fn shutdown_stops_the_consumer() {
    let bus = Arc::new(InMemoryEventBus::new());
    let handler = Arc::new(RecordingHandler::default());
    let (_dead_letters, shutdown, task) = start_consumer(&bus, &handler, fast_retries(0)).await;

    shutdown.send(()).expect("consumer listening");

    tokio::time::timeout(SETTLE, task)
        .await
        .expect("consumer stops in time")
        .expect("consumer task does not panic");
}

#[test]
fn builder_names_the_missing_field() {
    let (_tx, rx) = broadcast::channel(1);
    let result = EventConsumer::builder()
        .name("runway-log")
        .topics(vec![TOPIC.to_string()])
        .shutdown(rx)
        .build();

    let error: IncompleteConsumer = match result {
        Ok(_) => panic!("consumer without a bus must not build"),
        Err(error) => error,
    };
    assert!(error.to_string().contains("event_bus"));
}
