//! Tracker registry and event router.
//!
//! The registry enforces one live tracker per id and routes each decoded
//! [`ServerEvent`] to the tracker it addresses.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace};
use trackwire_protocol::{ClientIntent, ServerEvent, TrackerId};

use crate::tracker::{Outbox, Tracker, TrackerContext};

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A tracker with this id is already registered.
    #[error("Tracker already registered: {0}")]
    DuplicateTracker(TrackerId),
}

/// What the router did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to the addressed tracker.
    Delivered,
    /// Answered by the router itself.
    Answered,
    /// No tracker is registered under the addressed id.
    Dropped,
}

struct Registration {
    seq: u64,
    tracker: Arc<dyn Tracker>,
}

/// The set of live trackers.
pub struct TrackerRegistry {
    trackers: DashMap<TrackerId, Registration>,
    next_seq: AtomicU64,
}

impl TrackerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trackers: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Register a tracker under `id`.
    ///
    /// `build` receives the tracker's context and runs while the id's slot is
    /// reserved, so it must not call back into this registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTracker`] if `id` is taken. The
    /// existing tracker is not touched.
    pub fn register<T, F>(
        self: &Arc<Self>,
        id: impl Into<TrackerId>,
        outbox: Weak<dyn Outbox>,
        build: F,
    ) -> Result<Arc<T>, RegistryError>
    where
        T: Tracker + 'static,
        F: FnOnce(TrackerContext) -> T,
    {
        let id = id.into();
        match self.trackers.entry(id.clone()) {
            Entry::Occupied(_) => {
                debug!(tracker = %id, "Rejected duplicate tracker");
                Err(RegistryError::DuplicateTracker(id))
            }
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let context = TrackerContext::new(id.clone(), seq, outbox, Arc::downgrade(self));
                let tracker = Arc::new(build(context));
                slot.insert(Registration {
                    seq,
                    tracker: Arc::clone(&tracker) as Arc<dyn Tracker>,
                });
                debug!(tracker = %id, seq, "Registered tracker");
                Ok(tracker)
            }
        }
    }

    /// Remove the tracker registered under `id`, if any.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.trackers.remove(id).is_some();
        if removed {
            debug!(tracker = %id, "Removed tracker");
        }
        removed
    }

    /// Remove `id` only if its registration is still `seq`.
    pub(crate) fn remove_registration(&self, id: &TrackerId, seq: u64) -> bool {
        let removed = self
            .trackers
            .remove_if(id.as_str(), |_, registration| registration.seq == seq)
            .is_some();
        if removed {
            debug!(tracker = %id, seq, "Tracker disposed itself");
        }
        removed
    }

    pub(crate) fn registration_seq(&self, id: &str) -> Option<u64> {
        self.trackers.get(id).map(|registration| registration.seq)
    }

    /// Check if a tracker is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.trackers.contains_key(id)
    }

    /// Get the tracker registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tracker>> {
        self.trackers
            .get(id)
            .map(|registration| Arc::clone(&registration.tracker))
    }

    /// Number of registered trackers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// Check if no tracker is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Registered ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<TrackerId> {
        self.snapshot().into_iter().map(|(id, _)| id).collect()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.trackers.clear();
    }

    /// Route one decoded event.
    ///
    /// Timestamp requests are answered here through `outbox` and never reach
    /// a tracker. Events for unknown ids are dropped: a tracker may have been
    /// removed locally while server frames for it were still in flight.
    pub fn route(&self, event: ServerEvent, outbox: &dyn Outbox) -> RouteOutcome {
        if let ServerEvent::TrackerTimestampRequest { tracker_id } = event {
            let now = unix_millis();
            trace!(tracker = %tracker_id, timestamp = now, "Answering timestamp request");
            outbox.send_intent(&ClientIntent::timestamp_response(tracker_id, now));
            return RouteOutcome::Answered;
        }

        let Some(tracker) = self.get(event.tracker_id().as_str()) else {
            trace!(
                tracker = %event.tracker_id(),
                kind = event.kind().as_str(),
                "Dropping event for unregistered tracker"
            );
            return RouteOutcome::Dropped;
        };

        match event {
            ServerEvent::TrackerOpen { .. } => tracker.on_open(),
            ServerEvent::TrackerClose { code, message, .. } => tracker.on_close(code, &message),
            ServerEvent::TrackerAction { action, serial, .. } => tracker.on_action(&action, serial),
            ServerEvent::TrackerApiResponse {
                api_id,
                status,
                response,
                params,
                ..
            } => tracker.on_api_response(api_id, status, &response, &params),
            ServerEvent::TrackerEmit { event, data, .. } => tracker.on_emit(&event, &data),
            // Answered above.
            ServerEvent::TrackerTimestampRequest { .. } => return RouteOutcome::Answered,
        }

        RouteOutcome::Delivered
    }

    /// Tell every registered tracker the transport is open.
    pub fn broadcast_connect(&self) {
        connect_all(&self.trackers());
    }

    /// Tell every registered tracker the transport went away.
    pub fn broadcast_disconnect(&self, code: u16) {
        disconnect_all(&self.trackers(), code);
    }

    /// Registered trackers in registration order.
    pub(crate) fn trackers(&self) -> Vec<Arc<dyn Tracker>> {
        self.snapshot()
            .into_iter()
            .map(|(_, tracker)| tracker)
            .collect()
    }

    /// Registered trackers in registration order, cloned out of the map so
    /// callbacks run without shard locks held.
    fn snapshot(&self) -> Vec<(TrackerId, Arc<dyn Tracker>)> {
        let mut entries: Vec<(u64, TrackerId, Arc<dyn Tracker>)> = self
            .trackers
            .iter()
            .map(|entry| {
                (
                    entry.seq,
                    entry.key().clone(),
                    Arc::clone(&entry.tracker),
                )
            })
            .collect();
        entries.sort_by_key(|(seq, _, _)| *seq);
        entries
            .into_iter()
            .map(|(_, id, tracker)| (id, tracker))
            .collect()
    }
}

pub(crate) fn connect_all(trackers: &[Arc<dyn Tracker>]) {
    debug!(trackers = trackers.len(), "Broadcasting connect");
    for tracker in trackers {
        tracker.on_connect();
    }
}

pub(crate) fn disconnect_all(trackers: &[Arc<dyn Tracker>], code: u16) {
    debug!(trackers = trackers.len(), code, "Broadcasting disconnect");
    for tracker in trackers {
        tracker.on_disconnect(code);
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("trackers", &self.trackers.len())
            .finish_non_exhaustive()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingOutbox, RecordingTracker, TrackerCall};
    use serde_json::json;

    fn setup() -> (Arc<TrackerRegistry>, Arc<RecordingOutbox>) {
        (Arc::new(TrackerRegistry::new()), Arc::new(RecordingOutbox::new(true)))
    }

    fn weak(outbox: &Arc<RecordingOutbox>) -> Weak<dyn Outbox> {
        let outbox: Arc<dyn Outbox> = Arc::clone(outbox) as Arc<dyn Outbox>;
        Arc::downgrade(&outbox)
    }

    #[test]
    fn test_duplicate_tracker_rejected() {
        let (registry, outbox) = setup();

        let first = registry
            .register("room:1", weak(&outbox), RecordingTracker::new)
            .unwrap();
        let second = registry.register("room:1", weak(&outbox), RecordingTracker::new);
        assert!(matches!(second, Err(RegistryError::DuplicateTracker(_))));

        // The original keeps receiving events.
        let outcome = registry.route(ServerEvent::emit("room:1", "ping", json!(1)), outbox.as_ref());
        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(
            first.calls(),
            vec![TrackerCall::Emit("ping".into(), json!(1))]
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (registry, outbox) = setup();
        registry
            .register("room:1", weak(&outbox), RecordingTracker::new)
            .unwrap();

        assert!(registry.remove("room:1"));
        assert!(!registry.remove("room:1"));
        assert!(!registry.remove("never-registered"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregistered_events_are_dropped() {
        let (registry, outbox) = setup();
        let other = registry
            .register("room:2", weak(&outbox), RecordingTracker::new)
            .unwrap();

        let outcome = registry.route(ServerEvent::emit("room:1", "msg", json!({})), outbox.as_ref());
        assert_eq!(outcome, RouteOutcome::Dropped);
        assert!(other.calls().is_empty());
        assert!(outbox.intents().is_empty());
    }

    #[test]
    fn test_events_reach_addressed_tracker() {
        let (registry, outbox) = setup();
        let a = registry
            .register("a", weak(&outbox), RecordingTracker::new)
            .unwrap();
        let b = registry
            .register("b", weak(&outbox), RecordingTracker::new)
            .unwrap();

        registry.route(ServerEvent::TrackerOpen { tracker_id: "a".into() }, outbox.as_ref());
        registry.route(
            ServerEvent::TrackerAction {
                tracker_id: "b".into(),
                action: json!({"op": "set"}),
                serial: 3,
            },
            outbox.as_ref(),
        );
        registry.route(
            ServerEvent::TrackerApiResponse {
                tracker_id: "a".into(),
                api_id: 9,
                status: 200,
                response: json!("ok"),
                params: json!([1]),
            },
            outbox.as_ref(),
        );
        registry.route(ServerEvent::close("b", 4000, "bye"), outbox.as_ref());

        assert_eq!(
            a.calls(),
            vec![TrackerCall::Open, TrackerCall::ApiResponse(9, 200)]
        );
        assert_eq!(
            b.calls(),
            vec![
                TrackerCall::Action(json!({"op": "set"}), 3),
                TrackerCall::Close(4000, "bye".into())
            ]
        );
    }

    #[test]
    fn test_timestamp_request_answered_by_router() {
        let (registry, outbox) = setup();
        let tracker = registry
            .register("clock", weak(&outbox), RecordingTracker::new)
            .unwrap();

        let outcome = registry.route(
            ServerEvent::TrackerTimestampRequest {
                tracker_id: "clock".into(),
            },
            outbox.as_ref(),
        );

        assert_eq!(outcome, RouteOutcome::Answered);
        assert!(tracker.calls().is_empty());

        let intents = outbox.intents();
        assert_eq!(intents.len(), 1);
        match &intents[0] {
            ClientIntent::TrackerTimestampResponse {
                tracker_id,
                timestamp,
            } => {
                assert_eq!(tracker_id.as_str(), "clock");
                assert!(*timestamp > 0);
            }
            other => panic!("Expected timestamp response, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_in_registration_order() {
        let (registry, outbox) = setup();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for id in ["z", "a", "m"] {
            let order = Arc::clone(&order);
            registry
                .register(id, weak(&outbox), move |ctx| {
                    RecordingTracker::new(ctx).with_order_log(order)
                })
                .unwrap();
        }

        registry.broadcast_connect();
        registry.broadcast_disconnect(1006);

        assert_eq!(
            *order.lock().unwrap(),
            vec!["connect:z", "connect:a", "connect:m", "disconnect:z", "disconnect:a", "disconnect:m"]
        );
        let ids: Vec<String> = registry.ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_stale_dispose_keeps_newer_registration() {
        let (registry, outbox) = setup();

        let old = registry
            .register("room:1", weak(&outbox), RecordingTracker::new)
            .unwrap();
        assert!(old.context().dispose());
        assert!(!old.context().is_registered());

        let new = registry
            .register("room:1", weak(&outbox), RecordingTracker::new)
            .unwrap();

        // The old handle must not evict its successor.
        assert!(!old.context().dispose());
        assert!(new.context().is_registered());
        assert!(registry.contains("room:1"));
    }

    #[test]
    fn test_tracker_may_dispose_during_broadcast() {
        let (registry, outbox) = setup();
        registry
            .register("a", weak(&outbox), |ctx| {
                RecordingTracker::new(ctx).dispose_on_disconnect()
            })
            .unwrap();

        registry.broadcast_disconnect(1006);
        assert!(registry.is_empty());
    }
}
