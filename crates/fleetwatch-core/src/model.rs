use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

/// Stable identity of a tracked vehicle. Wire ids may be numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_id(deserializer).map(Self)
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match WireId::deserialize(deserializer)? {
        WireId::Text(text) => text,
        WireId::Signed(n) => n.to_string(),
        WireId::Unsigned(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// WGS84 range check; NaN and infinities are rejected.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixState {
    Live,
    Stale,
    /// Never observed or no usable coordinates. Must not be drawn as a pin.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub entity_id: EntityId,
    pub label: String,
    pub association_id: String,
    pub coordinates: Option<Coordinates>,
    pub speed_kmh: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
    pub fix: FixState,
}

impl Position {
    pub fn from_payload(
        payload: PositionPayload,
        received_at: DateTime<Utc>,
        stale_after: Duration,
    ) -> Self {
        let coordinates = match (payload.latitude, payload.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)).filter(Coordinates::is_valid),
            _ => None,
        };
        let observed_at = timestamp_field(payload.updated_at.as_deref(), "updatedAt", &payload.entity_id);

        let fix = match (coordinates, observed_at) {
            (Some(_), Some(observed)) => {
                // Fixes from the future (clock skew) count as fresh.
                let age = received_at
                    .signed_duration_since(observed)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age > stale_after {
                    FixState::Stale
                } else {
                    FixState::Live
                }
            }
            _ => FixState::Unavailable,
        };

        let label = if payload.label.trim().is_empty() {
            payload.entity_id.to_string()
        } else {
            payload.label
        };

        Self {
            entity_id: payload.entity_id,
            label,
            association_id: payload.association_id,
            coordinates,
            speed_kmh: sanitize_speed(payload.speed),
            observed_at,
            fix,
        }
    }

    /// Coordinates to pin on a map, if this position may be shown as "here".
    pub fn located_at(&self) -> Option<Coordinates> {
        match self.fix {
            FixState::Unavailable => None,
            FixState::Live | FixState::Stale => self.coordinates,
        }
    }
}

/// `GET /positions/{associationId}` body, or one element of `GET /positions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPayload {
    #[serde(deserialize_with = "deserialize_id")]
    pub association_id: String,
    pub entity_id: EntityId,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertStyle {
    pub title: &'static str,
    pub glyph: &'static str,
    pub severity: Severity,
}

const GENERIC_ALERT: AlertStyle = AlertStyle {
    title: "Alert",
    glyph: "*",
    severity: Severity::Info,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    Overspeed,
    ZoneEntry,
    ZoneExit,
    /// Kind the client does not know; keeps the raw wire value.
    Unknown(String),
}

impl AlertKind {
    pub fn from_wire(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "overspeed" | "speeding" => Self::Overspeed,
            "zoneentry" | "zoneenter" | "geofenceenter" | "geofenceentry" => Self::ZoneEntry,
            "zoneexit" | "geofenceexit" => Self::ZoneExit,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Overspeed => "overspeed",
            Self::ZoneEntry => "zone_entry",
            Self::ZoneExit => "zone_exit",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn descriptor(&self) -> AlertStyle {
        match self {
            Self::Overspeed => AlertStyle {
                title: "Overspeed",
                glyph: "!!",
                severity: Severity::Critical,
            },
            Self::ZoneEntry => AlertStyle {
                title: "Zone entry",
                glyph: "->",
                severity: Severity::Info,
            },
            Self::ZoneExit => AlertStyle {
                title: "Zone exit",
                glyph: "<-",
                severity: Severity::Warning,
            },
            Self::Unknown(_) => GENERIC_ALERT,
        }
    }
}

impl Serialize for AlertKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub entity_id: EntityId,
    pub label: String,
    pub association_id: String,
    pub message: String,
    pub event_time: Option<DateTime<Utc>>,
}

impl From<AlertPayload> for Alert {
    fn from(payload: AlertPayload) -> Self {
        let event_time = timestamp_field(payload.event_time.as_deref(), "eventTime", &payload.entity_id);
        Self {
            kind: AlertKind::from_wire(&payload.kind),
            entity_id: payload.entity_id,
            label: payload.label,
            association_id: payload.association_id,
            message: payload.message,
            event_time,
        }
    }
}

/// One element of the `GET /alerts` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub association_id: String,
    pub entity_id: EntityId,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub event_time: Option<String>,
}

/// Accepts RFC 3339, naive date-times (read as UTC) and bare dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn timestamp_field(raw: Option<&str>, field: &str, entity: &EntityId) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        warn!(%entity, field, value = raw, "unreadable timestamp, treating as absent");
    }
    parsed
}

fn sanitize_speed(speed: Option<f64>) -> Option<f64> {
    speed.filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn payload(json: &str) -> PositionPayload {
        serde_json::from_str(json).expect("position payload")
    }

    #[test]
    fn numeric_and_textual_ids_normalize_to_the_same_identity() {
        let a = payload(r#"{"associationId": 7, "entityId": 12, "label": "A-1", "latitude": 1.0, "longitude": 2.0}"#);
        let b = payload(r#"{"associationId": "7", "entityId": "12", "label": "A-1", "latitude": 1.0, "longitude": 2.0}"#);

        assert_eq!(a.entity_id, b.entity_id);
        assert_eq!(a.association_id, "7");
    }

    #[test]
    fn position_without_fix_time_is_unavailable() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date");
        let p = payload(r#"{"associationId": 1, "entityId": 3, "label": "12345-A-6", "latitude": 33.59, "longitude": -7.62, "updatedAt": null}"#);

        let position = Position::from_payload(p, now, Duration::from_secs(600));

        assert_eq!(position.fix, FixState::Unavailable);
        assert_eq!(position.located_at(), None);
    }

    #[test]
    fn old_fix_is_stale_but_still_located() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date");
        let p = payload(r#"{"associationId": 1, "entityId": 3, "label": "X", "latitude": 33.59, "longitude": -7.62, "updatedAt": "2024-05-01T11:00:00Z"}"#);

        let position = Position::from_payload(p, now, Duration::from_secs(600));

        assert_eq!(position.fix, FixState::Stale);
        assert_eq!(position.located_at(), Some(Coordinates::new(33.59, -7.62)));
    }

    #[test]
    fn negative_speed_is_unknown_not_zero() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date");
        let p = payload(r#"{"associationId": 1, "entityId": 3, "label": "X", "latitude": 0.5, "longitude": 0.5, "speed": -4.0, "updatedAt": "2024-05-01T12:00:00Z"}"#);

        let position = Position::from_payload(p, now, Duration::from_secs(600));

        assert_eq!(position.speed_kmh, None);
        assert_eq!(position.fix, FixState::Live);
    }

    #[test]
    fn out_of_range_coordinates_are_not_located() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date");
        let p = payload(r#"{"associationId": 1, "entityId": 3, "label": "X", "latitude": 123.0, "longitude": 0.5, "updatedAt": "2024-05-01T12:00:00Z"}"#);

        let position = Position::from_payload(p, now, Duration::from_secs(600));

        assert_eq!(position.coordinates, None);
        assert_eq!(position.fix, FixState::Unavailable);
    }

    #[test]
    fn timestamps_accept_common_backend_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).single().expect("valid date");

        assert_eq!(parse_timestamp("2024-01-03"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-03T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-03 00:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-03T01:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn alert_kinds_resolve_aliases_and_keep_unknown_raw_value() {
        assert_eq!(AlertKind::from_wire("OVERSPEED"), AlertKind::Overspeed);
        assert_eq!(AlertKind::from_wire("zone-entry"), AlertKind::ZoneEntry);
        assert_eq!(AlertKind::from_wire("GEOFENCE_EXIT"), AlertKind::ZoneExit);

        let unknown = AlertKind::from_wire("HARSH_BRAKING");
        assert_eq!(unknown, AlertKind::Unknown("HARSH_BRAKING".to_string()));
        assert_eq!(unknown.as_str(), "HARSH_BRAKING");
        assert_eq!(unknown.descriptor(), GENERIC_ALERT);
    }
}
