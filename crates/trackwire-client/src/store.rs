//! Store that logs what its tracker receives.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};
use trackwire_core::TrackerStore;
use trackwire_protocol::EventKind;

use crate::metrics::{self, ActiveTrackers};

/// Logs every event addressed to one tracker and keeps the last applied
/// action serial.
#[derive(Debug)]
pub struct LogStore {
    tracker: String,
    last_serial: AtomicU64,
    active: ActiveTrackers,
}

impl LogStore {
    /// Create a store for the tracker named `tracker`. `active` is
    /// decremented when the server closes the tracker.
    #[must_use]
    pub fn new(tracker: impl Into<String>, active: ActiveTrackers) -> Self {
        Self {
            tracker: tracker.into(),
            last_serial: AtomicU64::new(0),
            active,
        }
    }

    /// Serial of the last applied action, 0 if none.
    #[must_use]
    pub fn last_serial(&self) -> u64 {
        self.last_serial.load(Ordering::SeqCst)
    }
}

impl TrackerStore for LogStore {
    fn apply_action(&self, action: &Value, serial: u64) {
        metrics::record_tracker_event(EventKind::Action.as_str());
        let previous = self.last_serial.swap(serial, Ordering::SeqCst);
        if serial <= previous {
            warn!(tracker = %self.tracker, serial, previous, "Action serial went backwards");
        }
        info!(tracker = %self.tracker, serial, %action, "Action");
    }

    fn on_open(&self) {
        metrics::record_tracker_event(EventKind::Open.as_str());
        info!(tracker = %self.tracker, "Tracker open");
    }

    fn on_close(&self, code: u16, message: &str) {
        metrics::record_tracker_event(EventKind::Close.as_str());
        self.active.closed();
        warn!(tracker = %self.tracker, code, message, "Tracker closed by server");
    }

    fn on_api_response(&self, api_id: u64, status: u16, response: &Value, _params: &Value) {
        metrics::record_tracker_event(EventKind::ApiResponse.as_str());
        info!(tracker = %self.tracker, api_id, status, %response, "API response");
    }

    fn on_emit(&self, event: &str, data: &Value) {
        metrics::record_tracker_event(EventKind::Emit.as_str());
        info!(tracker = %self.tracker, event, %data, "Emit");
    }

    fn on_connectivity(&self, connected: bool) {
        info!(tracker = %self.tracker, connected, "Connectivity changed");
    }
}
