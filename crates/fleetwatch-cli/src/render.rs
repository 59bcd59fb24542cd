use anyhow::Result;
use chrono::{DateTime, Utc};
use fleetwatch_core::{Alert, Availability, Coordinates, FixState, Position, Snapshot};
use serde::Serialize;

use crate::OutputFormat;

/// One-line text form of a snapshot item.
pub trait HumanLine {
    fn human_line(&self) -> String;
}

impl HumanLine for Position {
    fn human_line(&self) -> String {
        match self.located_at() {
            Some(at) => format!(
                "{:<12} {}  speed={}  fix={}  seen={}",
                self.label,
                format_coordinates(at),
                format_speed(self.speed_kmh),
                fix_label(self.fix),
                format_time(self.observed_at),
            ),
            None => format!("{:<12} location unavailable", self.label),
        }
    }
}

impl HumanLine for Alert {
    fn human_line(&self) -> String {
        let style = self.kind.descriptor();
        format!(
            "{:<2} {:<10} {:<12} {}  {}",
            style.glyph,
            style.title,
            self.label,
            format_time(self.event_time),
            self.message,
        )
    }
}

pub fn format_coordinates(at: Coordinates) -> String {
    let ns = if at.latitude >= 0.0 { "N" } else { "S" };
    let ew = if at.longitude >= 0.0 { "E" } else { "W" };
    format!(
        "{:.4}°{}, {:.4}°{}",
        at.latitude.abs(),
        ns,
        at.longitude.abs(),
        ew
    )
}

pub fn format_speed(speed_kmh: Option<f64>) -> String {
    match speed_kmh {
        Some(v) => format!("{v:.0} km/h"),
        None => "unknown".to_string(),
    }
}

pub fn format_time(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    }
}

pub fn fix_label(fix: FixState) -> &'static str {
    match fix {
        FixState::Live => "live",
        FixState::Stale => "stale",
        FixState::Unavailable => "unavailable",
    }
}

pub fn status_line<T>(snapshot: &Snapshot<T>) -> String {
    let state = match snapshot.availability {
        Availability::Pending => "loading",
        Availability::NoData => "no data",
        Availability::Tracked => "tracking",
        Availability::Ineligible { .. } => "unavailable",
    };
    let mut line = format!(
        "state={state} items={} updated={}",
        snapshot.items.len(),
        format_time(snapshot.fetched_at)
    );
    if let Some(reason) = snapshot.ineligible_reason() {
        line.push_str(" | ");
        line.push_str(reason);
    }
    if let Some(error) = &snapshot.error {
        line.push_str(" | ! ");
        line.push_str(error);
    }
    line
}

pub fn print_snapshot<T: Serialize + HumanLine>(snapshot: &Snapshot<T>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(snapshot)?);
        }
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(snapshot)?);
        }
        OutputFormat::Human => {
            println!("=== Fleetwatch Snapshot ===");
            println!("Time:   {}", Utc::now().to_rfc3339());
            println!("Status: {}", status_line(snapshot));
            if snapshot.items.is_empty() && snapshot.is_settled() {
                println!("        (nothing to show)");
            }
            for item in &snapshot.items {
                println!("  {}", item.human_line());
            }
        }
    }

    Ok(())
}
