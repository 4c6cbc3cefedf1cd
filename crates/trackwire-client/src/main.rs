//! # trackwire
//!
//! Keeps a set of trackers connected to a trackwire server and logs what they
//! receive.
//!
//! ## Usage
//!
//! ```bash
//! # Run with trackwire.toml from the default search paths
//! trackwire
//!
//! # Run with a specific config file
//! trackwire /path/to/trackwire.toml
//!
//! # Override settings with environment variables
//! TRACKWIRE__ADDRESS=https://realtime.example.com TRACKWIRE__CODEC=json trackwire
//! ```

mod config;
mod metrics;
mod store;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trackwire_core::{LifecycleEvent, LifecycleKind};
use trackwire_transport::Client;

use crate::store::LogStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackwire=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::Config::load(config_path.as_deref())?;

    tracing::info!(
        address = %config.address,
        path = %config.path,
        codec = ?config.codec,
        trackers = config.trackers.len(),
        "Starting trackwire client"
    );

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let client = Client::builder(&config.address)
        .with_context(|| format!("Invalid address: {}", config.address))?
        .retry_interval(config.retry_interval())
        .websocket(config.websocket_config())
        .codec(config.codec())
        .spawn();

    client.on(LifecycleKind::Connect, |_| metrics::record_connect());
    client.on(LifecycleKind::Disconnect, |event| {
        if let LifecycleEvent::Disconnect { code } = event {
            metrics::record_disconnect(*code);
        }
    });

    let active = metrics::ActiveTrackers::new();
    for tracker in &config.trackers {
        let store = LogStore::new(&tracker.id, active.clone());
        client
            .create_tracker(tracker.id.as_str(), store, tracker.params.clone())
            .with_context(|| format!("Failed to create tracker {}", tracker.id))?;
        active.opened();
    }

    client.connect(&config.path);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!(stats = ?client.stats(), "Shutting down");
    drop(client);

    Ok(())
}
