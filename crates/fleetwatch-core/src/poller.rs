use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::reconcile::{reconcile, FeedPayload, PollOutcome, ReconcileContext};
use crate::snapshot::Snapshot;
use crate::source::Feed;

/// Shortest cadence a poller accepts.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Item type a feed's snapshots carry.
pub type FeedItem<F> = <<F as Feed>::Payload as FeedPayload>::Item;

type Listener<T> = Arc<dyn Fn(Arc<Snapshot<T>>) + Send + Sync>;

pub(crate) struct State<T> {
    pub(crate) snapshot: Arc<Snapshot<T>>,
    listeners: Vec<(u64, Listener<T>)>,
    next_listener: u64,
    /// Cycle number and abort handle of the outstanding fetch, if any.
    in_flight: Option<(u64, AbortHandle)>,
    pub(crate) stopped: bool,
}

pub(crate) struct Shared<T> {
    state: Mutex<State<T>>,
    /// Held while listeners run, so `stop` can wait out a delivery already underway.
    delivery: Mutex<()>,
}

impl<T> Shared<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                snapshot: Arc::new(Snapshot::empty()),
                listeners: Vec::new(),
                next_listener: 0,
                in_flight: None,
                stopped: false,
            }),
            delivery: Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Periodic fetch loop for one feed, owned by exactly one view.
///
/// The first fetch starts immediately, then one per `interval`. A tick that
/// arrives while a fetch is outstanding is skipped. Listeners run on the
/// poller's tasks and must not call back into [`Poller::stop`].
pub struct Poller<F: Feed> {
    shared: Arc<Shared<FeedItem<F>>>,
    ticker: Option<JoinHandle<()>>,
    name: String,
}

impl<F: Feed> Poller<F> {
    /// Must be called from within a tokio runtime. `every` is raised to
    /// [`MIN_INTERVAL`] if shorter.
    pub fn start(feed: F, every: Duration, stale_after: Duration) -> Self {
        let name = feed.describe();
        if every < MIN_INTERVAL {
            warn!(feed = %name, requested_ms = every.as_millis() as u64, "poll interval too short, using minimum");
        }
        let every = every.max(MIN_INTERVAL);
        let shared = Arc::new(Shared::new());
        let ticker = tokio::spawn(run_ticker(
            Arc::new(feed),
            Arc::clone(&shared),
            every,
            stale_after,
        ));

        info!(feed = %name, interval_ms = every.as_millis() as u64, "poller started");

        Self {
            shared,
            ticker: Some(ticker),
            name,
        }
    }

    pub fn latest(&self) -> Arc<Snapshot<FeedItem<F>>> {
        Arc::clone(&self.shared.state().snapshot)
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Registers `listener` for every snapshot published from now on.
    pub fn subscribe(
        &self,
        listener: impl Fn(Arc<Snapshot<FeedItem<F>>>) + Send + Sync + 'static,
    ) -> Subscription<FeedItem<F>> {
        let listener: Listener<FeedItem<F>> = Arc::new(listener);
        let mut state = self.shared.state();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.push((id, listener));

        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Cancels future ticks and the outstanding fetch. No listener runs after this returns.
    pub fn stop(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        ticker.abort();

        {
            let mut state = self.shared.state();
            state.stopped = true;
            state.listeners.clear();
            if let Some((cycle, handle)) = state.in_flight.take() {
                debug!(feed = %self.name, cycle, "aborting in-flight poll");
                handle.abort();
            }
        }

        drop(self.shared.delivery.lock().unwrap_or_else(PoisonError::into_inner));
        info!(feed = %self.name, "poller stopped");
    }
}

impl<F: Feed> Drop for Poller<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle returned by [`Poller::subscribe`]; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription<T> {
    shared: Weak<Shared<T>>,
    id: u64,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.state().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// One fetch reconciled against `previous`, outside of any poller.
pub async fn poll_once<F: Feed>(
    feed: &F,
    previous: &Snapshot<FeedItem<F>>,
    stale_after: Duration,
) -> Snapshot<FeedItem<F>> {
    let outcome = fetch_outcome(feed, 0).await;
    let ctx = ReconcileContext {
        received_at: Utc::now(),
        stale_after,
    };
    reconcile(previous, outcome, &ctx)
}

async fn fetch_outcome<F: Feed>(feed: &F, cycle: u64) -> PollOutcome<F::Payload> {
    let result = feed.fetch().await;
    match &result {
        Ok(_) => debug!(feed = %feed.describe(), cycle, "poll succeeded"),
        Err(err) if err.is_forbidden() => {
            info!(feed = %feed.describe(), cycle, "tracking not eligible")
        }
        Err(err) => warn!(feed = %feed.describe(), cycle, error = %err, "poll failed"),
    }
    PollOutcome::from(result)
}

async fn run_ticker<F: Feed>(
    feed: Arc<F>,
    shared: Arc<Shared<FeedItem<F>>>,
    every: Duration,
    stale_after: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycle: u64 = 0;

    loop {
        ticker.tick().await;
        cycle += 1;

        let mut state = shared.state();
        if state.stopped {
            break;
        }
        if let Some((busy, _)) = &state.in_flight {
            debug!(feed = %feed.describe(), cycle, in_flight = *busy, "previous poll still running, skipping tick");
            continue;
        }

        let task = tokio::spawn(run_cycle(
            Arc::clone(&feed),
            Arc::clone(&shared),
            stale_after,
            cycle,
        ));
        state.in_flight = Some((cycle, task.abort_handle()));
    }
}

async fn run_cycle<F: Feed>(
    feed: Arc<F>,
    shared: Arc<Shared<FeedItem<F>>>,
    stale_after: Duration,
    cycle: u64,
) {
    let _in_flight = InFlight {
        shared: Arc::clone(&shared),
        cycle,
    };
    let outcome = fetch_outcome(feed.as_ref(), cycle).await;
    deliver(&shared, outcome, stale_after);
}

/// Clears the busy flag when a cycle ends, including on abort or panic.
struct InFlight<T> {
    shared: Arc<Shared<T>>,
    cycle: u64,
}

impl<T> Drop for InFlight<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        if matches!(state.in_flight, Some((cycle, _)) if cycle == self.cycle) {
            state.in_flight = None;
        }
    }
}

pub(crate) fn deliver<P: FeedPayload>(shared: &Shared<P::Item>, outcome: PollOutcome<P>, stale_after: Duration) {
    let _delivery = shared.delivery.lock().unwrap_or_else(PoisonError::into_inner);

    let (snapshot, listeners) = {
        let mut state = shared.state();
        if state.stopped {
            debug!("poller stopped, discarding late result");
            return;
        }

        let ctx = ReconcileContext {
            received_at: Utc::now(),
            stale_after,
        };
        let next = Arc::new(reconcile(&state.snapshot, outcome, &ctx));
        state.snapshot = Arc::clone(&next);
        let listeners: Vec<Listener<P::Item>> =
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        (next, listeners)
    };

    for listener in listeners {
        listener(Arc::clone(&snapshot));
    }
}
