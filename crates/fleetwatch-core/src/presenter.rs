//! Map state derived from position snapshots.
//!
//! The presenter keeps one [`Marker`] per tracked identity and moves it in
//! place across refreshes; a marker is only dropped when its identity leaves
//! the snapshot. It also owns the camera and the current selection. Rendering
//! itself belongs to the host (the terminal viewer in `fleetwatch-cli`).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::MapConfig;
use crate::model::{Coordinates, EntityId, FixState, Position};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MarkerId(u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub id: MarkerId,
    pub entity: EntityId,
    pub label: String,
    pub coordinates: Option<Coordinates>,
    pub speed_kmh: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
    pub fix: FixState,
}

impl Marker {
    fn new(id: MarkerId, position: &Position) -> Self {
        Self {
            id,
            entity: position.entity_id.clone(),
            label: position.label.clone(),
            coordinates: position.coordinates,
            speed_kmh: position.speed_kmh,
            observed_at: position.observed_at,
            fix: position.fix,
        }
    }

    /// Where to draw the pin. `None` for vehicles without a usable fix.
    pub fn plotted_at(&self) -> Option<Coordinates> {
        match self.fix {
            FixState::Unavailable => None,
            FixState::Live | FixState::Stale => self.coordinates,
        }
    }

    pub fn is_plotted(&self) -> bool {
        self.plotted_at().is_some()
    }

    /// Returns true when the pin moved.
    fn update_from(&mut self, position: &Position) -> bool {
        let before = self.plotted_at();
        self.label.clone_from(&position.label);
        self.coordinates = position.coordinates;
        self.speed_kmh = position.speed_kmh;
        self.observed_at = position.observed_at;
        self.fix = position.fix;
        before != self.plotted_at()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerDiff {
    pub added: Vec<EntityId>,
    pub moved: Vec<EntityId>,
    pub removed: Vec<EntityId>,
}

impl MarkerDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.moved.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    center: Coordinates,
    zoom: f64,
    target: Option<(Coordinates, f64)>,
    flights: u64,
}

impl Camera {
    fn new(center: Coordinates, zoom: f64) -> Self {
        Self {
            center,
            zoom,
            target: None,
            flights: 0,
        }
    }

    pub fn center(&self) -> Coordinates {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Number of animated flights started so far.
    pub fn flights(&self) -> u64 {
        self.flights
    }

    pub fn is_animating(&self) -> bool {
        self.target.is_some()
    }

    /// Where the camera ends up once the current flight finishes.
    pub fn destination(&self) -> (Coordinates, f64) {
        self.target.unwrap_or((self.center, self.zoom))
    }

    fn jump_to(&mut self, center: Coordinates, zoom: f64) {
        self.center = center;
        self.zoom = zoom;
        self.target = None;
    }

    fn fly_to(&mut self, center: Coordinates, zoom: f64) {
        self.target = Some((center, zoom));
        self.flights += 1;
    }

    /// Eases toward the flight target by `fraction` of the remaining distance.
    pub fn advance(&mut self, fraction: f64) {
        let Some((target, target_zoom)) = self.target else {
            return;
        };
        let f = fraction.clamp(0.0, 1.0);
        self.center.latitude += (target.latitude - self.center.latitude) * f;
        self.center.longitude += (target.longitude - self.center.longitude) * f;
        self.zoom += (target_zoom - self.zoom) * f;

        let settled = (target.latitude - self.center.latitude).abs() < 1e-6
            && (target.longitude - self.center.longitude).abs() < 1e-6
            && (target_zoom - self.zoom).abs() < 1e-3;
        if settled {
            self.jump_to(target, target_zoom);
        }
    }

    /// Half-width in degrees of longitude and latitude visible at the current zoom.
    pub fn span(&self) -> (f64, f64) {
        let lon = 180.0 / 2f64.powf(self.zoom.max(0.0));
        (lon, lon / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Banner {
    None,
    /// Transient failure shown over the last known data.
    Error(String),
    /// Tracking not permitted right now; an empty state, not an error.
    Unavailable(String),
}

pub struct MapPresenter {
    config: MapConfig,
    markers: Vec<Marker>,
    camera: Camera,
    selection: Option<EntityId>,
    phase: ViewPhase,
    banner: Banner,
    next_marker: u64,
    framed: bool,
}

impl MapPresenter {
    pub fn new(config: MapConfig) -> Self {
        Self {
            camera: Camera::new(config.default_center, config.default_zoom),
            config,
            markers: Vec::new(),
            selection: None,
            phase: ViewPhase::Loading,
            banner: Banner::None,
            next_marker: 0,
            framed: false,
        }
    }

    pub fn apply(&mut self, snapshot: &Snapshot<Position>) -> MarkerDiff {
        if snapshot.is_settled() {
            self.phase = ViewPhase::Ready;
        }
        self.banner = match (&snapshot.error, snapshot.ineligible_reason()) {
            (Some(error), _) => Banner::Error(error.clone()),
            (None, Some(reason)) => Banner::Unavailable(reason.to_string()),
            (None, None) => Banner::None,
        };

        let mut previous: HashMap<EntityId, Marker> = self
            .markers
            .drain(..)
            .map(|marker| (marker.entity.clone(), marker))
            .collect();
        let mut seen = HashSet::new();
        let mut diff = MarkerDiff::default();
        let mut next = Vec::with_capacity(snapshot.items.len());

        for position in &snapshot.items {
            if !seen.insert(position.entity_id.clone()) {
                continue;
            }
            match previous.remove(&position.entity_id) {
                Some(mut marker) => {
                    if marker.update_from(position) {
                        diff.moved.push(marker.entity.clone());
                    }
                    next.push(marker);
                }
                None => {
                    let id = MarkerId(self.next_marker);
                    self.next_marker += 1;
                    diff.added.push(position.entity_id.clone());
                    next.push(Marker::new(id, position));
                }
            }
        }

        diff.removed = previous.into_keys().collect();
        diff.removed.sort();
        self.markers = next;

        if let Some(selected) = &self.selection {
            if !self.markers.iter().any(|m| &m.entity == selected) {
                debug!(entity = %selected, "selected vehicle left the snapshot");
                self.selection = None;
            }
        }

        if !self.framed {
            if let Some(first) = self.markers.iter().find_map(Marker::plotted_at) {
                self.camera.jump_to(first, self.config.focus_zoom);
                self.framed = true;
            }
        }

        if !diff.is_empty() {
            debug!(
                added = diff.added.len(),
                moved = diff.moved.len(),
                removed = diff.removed.len(),
                "markers updated"
            );
        }
        diff
    }

    /// Focuses `entity`. Returns false (and does nothing) if it is already
    /// selected or has no pin to fly to.
    pub fn select(&mut self, entity: &EntityId) -> bool {
        if self.selection.as_ref() == Some(entity) {
            return false;
        }
        let Some(target) = self.marker(entity).and_then(Marker::plotted_at) else {
            return false;
        };

        self.camera.fly_to(target, self.config.focus_zoom);
        self.selection = Some(entity.clone());
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn selection(&self) -> Option<&EntityId> {
        self.selection.as_ref()
    }

    /// Content of the detail popover: the selected marker.
    pub fn detail(&self) -> Option<&Marker> {
        self.selection.as_ref().and_then(|entity| self.marker(entity))
    }

    pub fn marker(&self, entity: &EntityId) -> Option<&Marker> {
        self.markers.iter().find(|m| &m.entity == entity)
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn phase(&self) -> ViewPhase {
        self.phase
    }

    pub fn banner(&self) -> &Banner {
        &self.banner
    }
}
