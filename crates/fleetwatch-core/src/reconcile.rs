use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{Alert, AlertPayload, EntityId, Position, PositionPayload};
use crate::snapshot::{Availability, Snapshot};
use crate::source::{FetchError, INELIGIBLE_REASON};

/// Time inputs for one reconciliation, passed in so `reconcile` stays pure.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext {
    pub received_at: DateTime<Utc>,
    pub stale_after: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<P> {
    Success(P),
    /// Backend answered 403: nothing to show until eligibility changes.
    Ineligible,
    /// Transient failure with a user-facing message.
    Failed(String),
}

impl<P> From<Result<P, FetchError>> for PollOutcome<P> {
    fn from(result: Result<P, FetchError>) -> Self {
        match result {
            Ok(payload) => Self::Success(payload),
            Err(err) if err.is_forbidden() => Self::Ineligible,
            Err(err) => Self::Failed(err.user_message()),
        }
    }
}

/// The one place that knows how a payload shape turns into snapshot items.
pub trait FeedPayload {
    type Item: Clone + Send + Sync + 'static;

    /// `None` means the backend had nothing yet (null body), as opposed to zero entities.
    fn into_items(self, ctx: &ReconcileContext) -> Option<Vec<Self::Item>>;
}

impl FeedPayload for Option<PositionPayload> {
    type Item = Position;

    fn into_items(self, ctx: &ReconcileContext) -> Option<Vec<Position>> {
        self.map(|payload| vec![Position::from_payload(payload, ctx.received_at, ctx.stale_after)])
    }
}

impl FeedPayload for Vec<PositionPayload> {
    type Item = Position;

    fn into_items(self, ctx: &ReconcileContext) -> Option<Vec<Position>> {
        let mut positions: Vec<Position> = Vec::with_capacity(self.len());
        let mut slots: HashMap<EntityId, usize> = HashMap::new();

        for payload in self {
            let position = Position::from_payload(payload, ctx.received_at, ctx.stale_after);
            match slots.get(&position.entity_id) {
                // First arrival keeps the slot, freshest fix keeps the data.
                Some(&slot) => {
                    if position.observed_at > positions[slot].observed_at {
                        positions[slot] = position;
                    }
                }
                None => {
                    slots.insert(position.entity_id.clone(), positions.len());
                    positions.push(position);
                }
            }
        }

        Some(positions)
    }
}

impl FeedPayload for Vec<AlertPayload> {
    type Item = Alert;

    fn into_items(self, _ctx: &ReconcileContext) -> Option<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self.into_iter().map(Alert::from).collect();
        sort_alerts(&mut alerts);
        Some(alerts)
    }
}

/// Newest first, undated last. Stable: equal keys keep arrival order.
pub fn sort_alerts(alerts: &mut [Alert]) {
    // Option orders None below Some, so a reversed comparison puts None last.
    alerts.sort_by(|a, b| b.event_time.cmp(&a.event_time));
}

pub fn reconcile<P: FeedPayload>(
    previous: &Snapshot<P::Item>,
    outcome: PollOutcome<P>,
    ctx: &ReconcileContext,
) -> Snapshot<P::Item> {
    match outcome {
        PollOutcome::Success(payload) => {
            let (items, availability) = match payload.into_items(ctx) {
                Some(items) => (items, Availability::Tracked),
                None => (Vec::new(), Availability::NoData),
            };
            Snapshot {
                items,
                availability,
                fetched_at: Some(ctx.received_at),
                error: None,
            }
        }
        PollOutcome::Ineligible => Snapshot {
            items: Vec::new(),
            availability: Availability::Ineligible {
                reason: INELIGIBLE_REASON.to_string(),
            },
            fetched_at: Some(ctx.received_at),
            error: None,
        },
        PollOutcome::Failed(message) => Snapshot {
            items: previous.items.clone(),
            availability: previous.availability.clone(),
            fetched_at: previous.fetched_at,
            error: Some(message),
        },
    }
}
