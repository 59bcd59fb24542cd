use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Alert, EntityId};

/// Reconciled, render-ready state of one feed. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub availability: Availability,
    /// Time of the last fetch that produced a definitive answer.
    pub fetched_at: Option<DateTime<Utc>>,
    /// User-facing message from the last failed fetch, if the data is now stale because of it.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Availability {
    /// Nothing reconciled yet.
    Pending,
    /// Successful fetch with a null payload.
    NoData,
    /// Successful fetch with entity data (possibly zero entities).
    Tracked,
    /// The backend refused tracking for now; a legitimate empty state.
    Ineligible { reason: String },
}

impl<T> Snapshot<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            availability: Availability::Pending,
            fetched_at: None,
            error: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.availability != Availability::Pending
    }

    pub fn is_stale(&self) -> bool {
        self.error.is_some()
    }

    pub fn ineligible_reason(&self) -> Option<&str> {
        match &self.availability {
            Availability::Ineligible { reason } => Some(reason),
            _ => None,
        }
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot<Alert> {
    /// Alerts for one entity, in snapshot order.
    pub fn for_entity<'a>(&'a self, entity: &'a EntityId) -> impl Iterator<Item = &'a Alert> + 'a {
        self.items.iter().filter(move |alert| &alert.entity_id == entity)
    }
}
