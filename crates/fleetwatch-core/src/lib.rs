pub mod config;
pub mod model;
pub mod poller;
pub mod presenter;
pub mod reconcile;
pub mod snapshot;
pub mod source;

#[cfg(test)]
mod poller_tests;

pub use config::{MapConfig, TrackingConfig, POLL_INTERVAL};
pub use model::{Alert, AlertKind, AlertStyle, Coordinates, EntityId, FixState, Position, Severity};
pub use poller::{poll_once, FeedItem, Poller, Subscription, MIN_INTERVAL};
pub use presenter::{Banner, Camera, MapPresenter, Marker, MarkerDiff, MarkerId, ViewPhase};
pub use reconcile::{reconcile, FeedPayload, PollOutcome, ReconcileContext};
pub use snapshot::{Availability, Snapshot};
pub use source::{AlertFeed, ApiClient, Feed, FetchError, FleetFeed, PositionFeed};
