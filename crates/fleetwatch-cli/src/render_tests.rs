use crate::render::{format_coordinates, format_speed, format_time, status_line, HumanLine};
use chrono::{TimeZone, Utc};
use fleetwatch_core::{Alert, AlertKind, Coordinates, EntityId, FixState, Position, Snapshot};

fn position(fix: FixState) -> Position {
    Position {
        entity_id: EntityId::new("3"),
        label: "12345-A-6".to_string(),
        association_id: "41".to_string(),
        coordinates: Some(Coordinates::new(33.59, -7.62)),
        speed_kmh: Some(42.0),
        observed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single(),
        fix,
    }
}

#[test]
fn coordinates_render_with_hemisphere_suffix() {
    assert_eq!(
        format_coordinates(Coordinates::new(33.59, -7.62)),
        "33.5900°N, 7.6200°W"
    );
    assert_eq!(
        format_coordinates(Coordinates::new(-33.9, 151.2)),
        "33.9000°S, 151.2000°E"
    );
}

#[test]
fn unknown_speed_is_not_rendered_as_zero() {
    assert_eq!(format_speed(None), "unknown");
    assert_eq!(format_speed(Some(0.0)), "0 km/h");
    assert_eq!(format_time(None), "never");
}

#[test]
fn unavailable_position_never_shows_coordinates() {
    // Arrange
    let live = position(FixState::Live);
    let unavailable = position(FixState::Unavailable);

    // Act
    let live_line = live.human_line();
    let unavailable_line = unavailable.human_line();

    // Assert
    assert!(live_line.contains("33.5900°N"));
    assert!(live_line.contains("42 km/h"));
    assert!(unavailable_line.contains("location unavailable"));
    assert!(!unavailable_line.contains("33.59"));
}

#[test]
fn unknown_alert_kind_uses_generic_title() {
    let alert = Alert {
        kind: AlertKind::Unknown("TOW_DETECTED".to_string()),
        entity_id: EntityId::new("3"),
        label: "12345-A-6".to_string(),
        association_id: "41".to_string(),
        message: "vehicle moved while parked".to_string(),
        event_time: None,
    };

    let line = alert.human_line();

    assert!(line.contains("Alert"));
    assert!(line.contains("vehicle moved while parked"));
    assert!(line.contains("never"));
}

#[test]
fn status_line_shows_error_over_last_known_data() {
    // Arrange
    let snapshot = Snapshot {
        items: vec![position(FixState::Live)],
        availability: fleetwatch_core::Availability::Tracked,
        fetched_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).single(),
        error: Some("Unable to reach the tracking service.".to_string()),
    };

    // Act
    let line = status_line(&snapshot);

    // Assert
    assert!(line.starts_with("state=tracking items=1"));
    assert!(line.contains("updated=2024-05-01 12:00:30 UTC"));
    assert!(line.ends_with("! Unable to reach the tracking service."));
}

#[test]
fn status_line_for_pending_snapshot() {
    let snapshot: Snapshot<Position> = Snapshot::empty();
    assert_eq!(status_line(&snapshot), "state=loading items=0 updated=never");
}
