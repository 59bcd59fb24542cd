use std::time::Duration;

use crate::model::Coordinates;

/// Cadence shared by every feed.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub stale_after: Duration,
    pub map: MapConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(15),
            stale_after: Duration::from_secs(600),
            map: MapConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MapConfig {
    pub default_center: Coordinates,
    pub default_zoom: f64,
    pub focus_zoom: f64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            // Casablanca
            default_center: Coordinates::new(33.5731, -7.5898),
            default_zoom: 6.0,
            focus_zoom: 13.0,
        }
    }
}
