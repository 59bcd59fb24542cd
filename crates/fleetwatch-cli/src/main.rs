use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fleetwatch_core::{
    poll_once, AlertFeed, ApiClient, Feed, FeedItem, FleetFeed, Poller, PositionFeed, Snapshot,
    TrackingConfig, POLL_INTERVAL,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::render::HumanLine;

mod render;
mod viewer;
#[cfg(test)]
mod render_tests;

#[derive(Debug, Parser)]
#[command(name = "fleetwatch")]
#[command(about = "Live vehicle location monitor for the rental back office (read-only)")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value = "http://localhost:8080/api")]
    base_url: String,

    #[arg(long, env = "FLEETWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, default_value_t = 15000)]
    timeout_ms: u64,

    #[arg(long, default_value_t = 600)]
    stale_after_secs: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll once and print the snapshot.
    Once {
        #[command(flatten)]
        feed: FeedArgs,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Poll every 30 seconds and print each snapshot until Ctrl-C.
    Watch {
        #[command(flatten)]
        feed: FeedArgs,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Terminal map with vehicle and alert lists.
    View {
        #[arg(long)]
        rental: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
struct FeedArgs {
    /// Track the vehicle of one rental instead of the whole fleet.
    #[arg(long, conflicts_with = "alerts")]
    rental: Option<String>,

    /// Poll the alert list.
    #[arg(long)]
    alerts: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = TrackingConfig {
        base_url: cli.base_url.clone(),
        api_token: cli.token.clone(),
        request_timeout: Duration::from_millis(cli.timeout_ms),
        stale_after: Duration::from_secs(cli.stale_after_secs),
        ..TrackingConfig::default()
    };
    let client = ApiClient::new(&config).context("failed to build tracking client")?;

    match cli.command {
        Command::Once { feed, format } => match (feed.rental, feed.alerts) {
            (Some(rental), _) => {
                once(PositionFeed::new(client, rental), config.stale_after, format).await?
            }
            (None, true) => once(AlertFeed::new(client), config.stale_after, format).await?,
            (None, false) => once(FleetFeed::new(client), config.stale_after, format).await?,
        },
        Command::Watch { feed, format } => match (feed.rental, feed.alerts) {
            (Some(rental), _) => {
                watch(PositionFeed::new(client, rental), config.stale_after, format).await?
            }
            (None, true) => watch(AlertFeed::new(client), config.stale_after, format).await?,
            (None, false) => watch(FleetFeed::new(client), config.stale_after, format).await?,
        },
        Command::View { rental } => {
            let alerts = AlertFeed::new(client.clone());
            match rental {
                Some(rental) => {
                    viewer::run_viewer(PositionFeed::new(client, rental), alerts, &config).await?
                }
                None => viewer::run_viewer(FleetFeed::new(client), alerts, &config).await?,
            }
        }
    }

    Ok(())
}

async fn once<F>(feed: F, stale_after: Duration, format: OutputFormat) -> Result<()>
where
    F: Feed,
    FeedItem<F>: Serialize + HumanLine,
{
    let snapshot = poll_once(&feed, &Snapshot::empty(), stale_after).await;
    render::print_snapshot(&snapshot, format)
}

async fn watch<F>(feed: F, stale_after: Duration, format: OutputFormat) -> Result<()>
where
    F: Feed,
    FeedItem<F>: Serialize + HumanLine,
{
    let mut poller = Poller::start(feed, POLL_INTERVAL, stale_after);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = poller.subscribe(move |snapshot| {
        let _ = tx.send(snapshot);
    });

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break Ok(());
            }
            Some(snapshot) = rx.recv() => {
                if let Err(err) = render::print_snapshot(snapshot.as_ref(), format) {
                    break Err(err);
                }
                info!(items = snapshot.items.len(), stale = snapshot.is_stale(), settled = snapshot.is_settled(), "snapshot");
            }
        }
    };

    poller.stop();
    result
}
