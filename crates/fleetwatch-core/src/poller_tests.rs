use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::model::{Position, PositionPayload};
use crate::poller::{deliver, poll_once, Poller, Shared, Subscription, MIN_INTERVAL};
use crate::reconcile::PollOutcome;
use crate::snapshot::{Availability, Snapshot};
use crate::source::{Feed, FetchError};

const EVERY: Duration = Duration::from_secs(30);
const STALE_AFTER: Duration = Duration::from_secs(600);

enum Step {
    Respond(Result<Option<PositionPayload>, FetchError>),
    Delay(Duration, Result<Option<PositionPayload>, FetchError>),
    Gate(Arc<Notify>, Result<Option<PositionPayload>, FetchError>),
    Hang,
}

struct ScriptedFeed {
    script: Mutex<VecDeque<Step>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFeed {
    fn new(steps: Vec<Step>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let feed = Self {
            script: Mutex::new(steps.into()),
            calls: Arc::clone(&calls),
        };
        (feed, calls)
    }
}

#[async_trait]
impl Feed for ScriptedFeed {
    type Payload = Option<PositionPayload>;

    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn fetch(&self) -> Result<Self::Payload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Step::Respond(Ok(None)));

        match step {
            Step::Respond(result) => result,
            Step::Delay(wait, result) => {
                tokio::time::sleep(wait).await;
                result
            }
            Step::Gate(gate, result) => {
                gate.notified().await;
                result
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

fn vehicle(lat: f64, lon: f64) -> Option<PositionPayload> {
    let payload = serde_json::from_value(serde_json::json!({
        "associationId": 41,
        "entityId": 3,
        "label": "12345-A-6",
        "latitude": lat,
        "longitude": lon,
        "speed": 42.0,
        "updatedAt": chrono::Utc::now().to_rfc3339(),
    }))
    .expect("position payload");
    Some(payload)
}

fn channel_listener(
    poller: &Poller<ScriptedFeed>,
) -> (
    Subscription<Position>,
    mpsc::UnboundedReceiver<Arc<Snapshot<Position>>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = poller.subscribe(move |snapshot| {
        let _ = tx.send(snapshot);
    });
    (subscription, rx)
}

#[tokio::test(start_paused = true)]
async fn first_fetch_runs_immediately() {
    // Arrange
    let (feed, calls) = ScriptedFeed::new(vec![Step::Respond(Ok(vehicle(33.59, -7.62)))]);
    let poller = Poller::start(feed, EVERY, STALE_AFTER);
    let (_subscription, mut rx) = channel_listener(&poller);

    // Act
    let snapshot = rx.recv().await.expect("first snapshot");

    // Assert
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.availability, Availability::Tracked);
    assert_eq!(poller.latest().items, snapshot.items);
}

#[tokio::test(start_paused = true)]
async fn busy_ticks_are_skipped_not_queued() {
    // Arrange
    let (feed, calls) = ScriptedFeed::new(vec![Step::Hang]);
    let poller = Poller::start(feed, EVERY, STALE_AFTER);

    // Act
    tokio::time::sleep(Duration::from_secs(100)).await;

    // Assert
    assert_eq!(calls.load(Ordering::SeqCst), 1, "ticks at 30/60/90s must be skipped");
    assert_eq!(poller.latest().availability, Availability::Pending);
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_does_not_shift_the_schedule() {
    // Arrange: the first fetch takes 45s, so the 30s tick is skipped.
    let (feed, calls) = ScriptedFeed::new(vec![
        Step::Delay(Duration::from_secs(45), Ok(vehicle(33.59, -7.62))),
        Step::Respond(Ok(vehicle(33.60, -7.63))),
    ]);
    let _poller = Poller::start(feed, EVERY, STALE_AFTER);

    // Act
    tokio::time::sleep(Duration::from_secs(50)).await;
    let after_slow = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(11)).await;

    // Assert: the next fetch happens on the 60s tick, not 30s after the slow one ended.
    assert_eq!(after_slow, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failures_are_reported_and_polling_continues() {
    // Arrange
    let (feed, _calls) = ScriptedFeed::new(vec![
        Step::Respond(Ok(vehicle(33.59, -7.62))),
        Step::Respond(Err(FetchError::Transport("connection reset".to_string()))),
        Step::Respond(Ok(vehicle(33.60, -7.63))),
    ]);
    let poller = Poller::start(feed, EVERY, STALE_AFTER);
    let (_subscription, mut rx) = channel_listener(&poller);

    // Act
    let first = rx.recv().await.expect("first");
    let second = rx.recv().await.expect("second");
    let third = rx.recv().await.expect("third");

    // Assert
    assert!(first.error.is_none());
    assert_eq!(second.items, first.items, "failure keeps the last good data");
    assert!(second.error.is_some());
    assert_eq!(second.fetched_at, first.fetched_at);
    assert!(third.error.is_none());
    let latitude = third.items[0].coordinates.map(|c| c.latitude);
    assert_eq!(latitude, Some(33.60));
}

#[tokio::test(start_paused = true)]
async fn forbidden_then_valid_position_recovers() {
    // Arrange
    let (feed, _calls) = ScriptedFeed::new(vec![
        Step::Respond(Err(FetchError::Forbidden)),
        Step::Respond(Ok(vehicle(33.59, -7.62))),
    ]);
    let poller = Poller::start(feed, EVERY, STALE_AFTER);
    let (_subscription, mut rx) = channel_listener(&poller);

    // Act
    let ineligible = rx.recv().await.expect("ineligible");
    let ready = rx.recv().await.expect("ready");

    // Assert
    assert!(ineligible.items.is_empty());
    assert!(ineligible.ineligible_reason().is_some());
    assert!(ineligible.error.is_none());
    assert_eq!(ready.items.len(), 1);
    assert_eq!(ready.ineligible_reason(), None);
}

#[tokio::test(start_paused = true)]
async fn result_resolving_after_stop_is_discarded() {
    // Arrange
    let gate = Arc::new(Notify::new());
    let (feed, calls) = ScriptedFeed::new(vec![Step::Gate(
        Arc::clone(&gate),
        Ok(vehicle(33.59, -7.62)),
    )]);
    let mut poller = Poller::start(feed, EVERY, STALE_AFTER);
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let _subscription = poller.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1, "fetch is in flight");

    // Act
    poller.stop();
    gate.notify_one();
    tokio::time::sleep(Duration::from_secs(120)).await;

    // Assert
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "no polls after stop");
    assert_eq!(poller.latest().availability, Availability::Pending);
    assert!(!poller.is_running());
}

#[test]
fn delivery_after_stop_leaves_state_untouched() {
    // Arrange
    let shared: Shared<Position> = Shared::new();
    shared.state().stopped = true;

    // Act
    deliver(&shared, PollOutcome::Success(vehicle(1.0, 2.0)), STALE_AFTER);

    // Assert
    assert_eq!(shared.state().snapshot.availability, Availability::Pending);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_poller_cancels_future_polls() {
    let (feed, calls) = ScriptedFeed::new(Vec::new());
    let poller = Poller::start(feed, EVERY, STALE_AFTER);

    drop(poller);
    tokio::time::sleep(Duration::from_secs(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_listener_is_not_called() {
    // Arrange
    let (feed, _calls) = ScriptedFeed::new(vec![Step::Respond(Ok(vehicle(33.59, -7.62)))]);
    let poller = Poller::start(feed, EVERY, STALE_AFTER);
    let dropped_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped_calls);
    let subscription = poller.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (_kept, mut rx) = channel_listener(&poller);

    // Act
    subscription.unsubscribe();
    rx.recv().await.expect("snapshot for the remaining listener");

    // Assert
    assert_eq!(dropped_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn poll_once_reconciles_a_single_fetch() {
    let (feed, calls) = ScriptedFeed::new(vec![Step::Respond(Err(FetchError::Status(503)))]);

    let snapshot = poll_once(&feed, &Snapshot::empty(), STALE_AFTER).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(snapshot.availability, Availability::Pending);
    assert!(snapshot.error.as_deref().is_some_and(|m| m.contains("503")));
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_raised_to_the_minimum() {
    // Arrange
    let (feed, calls) = ScriptedFeed::new(Vec::new());

    // Act
    let poller = Poller::start(feed, Duration::ZERO, STALE_AFTER);
    tokio::time::sleep(MIN_INTERVAL + MIN_INTERVAL / 2).await;

    // Assert
    assert!(poller.is_running());
    assert_eq!(calls.load(Ordering::SeqCst), 2, "ticks at 0 and at the minimum interval");
    assert_eq!(poller.latest().availability, Availability::NoData);
}
