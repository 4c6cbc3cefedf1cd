//! Metrics collection and export for the trackwire client.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTS_TOTAL: &str = "trackwire_connects_total";
    pub const DISCONNECTS_TOTAL: &str = "trackwire_disconnects_total";
    pub const TRACKER_EVENTS_TOTAL: &str = "trackwire_tracker_events_total";
    pub const TRACKERS_ACTIVE: &str = "trackwire_trackers_active";
    pub const CONNECTED: &str = "trackwire_connected";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::CONNECTS_TOTAL, "Total number of completed handshakes");
    metrics::describe_counter!(
        names::DISCONNECTS_TOTAL,
        "Total number of lost connections, by close code"
    );
    metrics::describe_counter!(
        names::TRACKER_EVENTS_TOTAL,
        "Total number of events delivered to trackers, by kind"
    );
    metrics::describe_gauge!(names::TRACKERS_ACTIVE, "Current number of registered trackers");
    metrics::describe_gauge!(names::CONNECTED, "1 while the socket is open");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a completed handshake.
pub fn record_connect() {
    counter!(names::CONNECTS_TOTAL).increment(1);
    gauge!(names::CONNECTED).set(1.0);
}

/// Record a lost connection.
pub fn record_disconnect(code: u16) {
    counter!(names::DISCONNECTS_TOTAL, "code" => code.to_string()).increment(1);
    gauge!(names::CONNECTED).set(0.0);
}

/// Record an event delivered to a tracker.
pub fn record_tracker_event(kind: &'static str) {
    counter!(names::TRACKER_EVENTS_TOTAL, "kind" => kind).increment(1);
}

/// Update the registered tracker count.
pub fn set_active_trackers(count: usize) {
    gauge!(names::TRACKERS_ACTIVE).set(count as f64);
}

/// Count of live trackers, mirrored into the active trackers gauge.
///
/// Trackers dispose themselves when the server closes them, so the count is
/// kept by the stores rather than sampled once at startup.
#[derive(Debug, Clone, Default)]
pub struct ActiveTrackers(Arc<AtomicUsize>);

impl ActiveTrackers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker was registered.
    pub fn opened(&self) {
        let count = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        set_active_trackers(count);
    }

    /// A tracker was closed by the server.
    pub fn closed(&self) {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .unwrap_or(0);
        set_active_trackers(previous.saturating_sub(1));
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
