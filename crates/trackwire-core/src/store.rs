//! Store-backed trackers.
//!
//! [`StoreTracker`] is the tracker built by `create_tracker`. It owns the
//! application's store, performs the open handshake each time the transport
//! connects, and forwards routed events to the store.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use trackwire_protocol::{ClientIntent, TrackerId};

use crate::tracker::{Tracker, TrackerContext};

/// The application side of a tracker.
///
/// How a store reconciles actions into its own state is up to it. Every
/// method except `apply_action` defaults to a no-op.
pub trait TrackerStore: Send + Sync + 'static {
    /// Apply one store action.
    fn apply_action(&self, action: &Value, serial: u64);

    /// The server accepted the open handshake.
    fn on_open(&self) {}

    /// The server closed the channel. The tracker is disposed afterwards.
    fn on_close(&self, _code: u16, _message: &str) {}

    /// A reply to [`StoreTracker::request`] arrived.
    fn on_api_response(&self, _api_id: u64, _status: u16, _response: &Value, _params: &Value) {}

    /// A named event arrived.
    fn on_emit(&self, _event: &str, _data: &Value) {}

    /// The shared transport became available or unavailable.
    fn on_connectivity(&self, _connected: bool) {}
}

/// Tracker bound to a store and the parameters it was opened with.
pub struct StoreTracker<S> {
    context: TrackerContext,
    store: S,
    params: Value,
    next_api_id: AtomicU64,
    open: AtomicBool,
}

impl<S: TrackerStore> StoreTracker<S> {
    /// Create a tracker. Normally called through `create_tracker`.
    #[must_use]
    pub fn new(context: TrackerContext, store: S, params: Value) -> Self {
        Self {
            context,
            store,
            params,
            next_api_id: AtomicU64::new(1),
            open: AtomicBool::new(false),
        }
    }

    /// Get the tracker's id.
    #[must_use]
    pub fn id(&self) -> &TrackerId {
        self.context.id()
    }

    /// Get the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the open parameters.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Get the registration context.
    #[must_use]
    pub fn context(&self) -> &TrackerContext {
        &self.context
    }

    /// Whether the server has acknowledged the open handshake on the current
    /// connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Send the open handshake. Returns `false` if the socket is not open.
    pub fn send_open(&self) -> bool {
        self.context
            .send_intent(&ClientIntent::open(self.id().clone(), self.params.clone()))
    }

    /// Issue an API request.
    ///
    /// Returns the request id, or `None` if the socket is not open and the
    /// request was dropped.
    pub fn request(&self, name: impl Into<String>, args: Value) -> Option<u64> {
        let api_id = self.next_api_id.fetch_add(1, Ordering::Relaxed);
        let intent = ClientIntent::TrackerApiRequest {
            tracker_id: self.id().clone(),
            api_id,
            name: name.into(),
            args,
        };
        self.context.send_intent(&intent).then_some(api_id)
    }

    /// Close the channel and remove the tracker.
    ///
    /// The close intent is best effort; the registration is removed either
    /// way.
    pub fn close(&self) {
        self.context.send_intent(&ClientIntent::TrackerClose {
            tracker_id: self.id().clone(),
        });
        self.open.store(false, Ordering::SeqCst);
        self.context.dispose();
    }
}

impl<S: TrackerStore> Tracker for StoreTracker<S> {
    fn on_connect(&self) {
        self.store.on_connectivity(true);
        if !self.send_open() {
            debug!(tracker = %self.id(), "Open handshake dropped, socket not open");
        }
    }

    fn on_disconnect(&self, _code: u16) {
        self.open.store(false, Ordering::SeqCst);
        self.store.on_connectivity(false);
    }

    fn on_open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.store.on_open();
    }

    fn on_close(&self, code: u16, message: &str) {
        debug!(tracker = %self.id(), code, message, "Channel closed by server");
        self.open.store(false, Ordering::SeqCst);
        self.store.on_close(code, message);
        self.context.dispose();
    }

    fn on_action(&self, action: &Value, serial: u64) {
        self.store.apply_action(action, serial);
    }

    fn on_api_response(&self, api_id: u64, status: u16, response: &Value, params: &Value) {
        self.store.on_api_response(api_id, status, response, params);
    }

    fn on_emit(&self, event: &str, data: &Value) {
        self.store.on_emit(event, data);
    }
}

impl<S> std::fmt::Debug for StoreTracker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTracker")
            .field("context", &self.context)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TrackerRegistry;
    use crate::testing::{RecordingOutbox, RecordingStore};
    use crate::tracker::Outbox;
    use serde_json::json;
    use std::sync::Arc;

    fn register(
        registry: &Arc<TrackerRegistry>,
        outbox: &Arc<RecordingOutbox>,
    ) -> Arc<StoreTracker<RecordingStore>> {
        let outbox: Arc<dyn Outbox> = Arc::clone(outbox) as Arc<dyn Outbox>;
        registry
            .register("records", Arc::downgrade(&outbox), |ctx| {
                StoreTracker::new(ctx, RecordingStore::default(), json!({"table": "users"}))
            })
            .unwrap()
    }

    #[test]
    fn test_connect_replays_open_handshake() {
        let registry = Arc::new(TrackerRegistry::new());
        let outbox = Arc::new(RecordingOutbox::new(true));
        let tracker = register(&registry, &outbox);

        tracker.on_connect();
        tracker.on_disconnect(1006);
        tracker.on_connect();

        let open = ClientIntent::open("records", json!({"table": "users"}));
        assert_eq!(outbox.intents(), vec![open.clone(), open]);
        assert_eq!(
            tracker.store().connectivity(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_open_state_follows_handshake() {
        let registry = Arc::new(TrackerRegistry::new());
        let outbox = Arc::new(RecordingOutbox::new(true));
        let tracker = register(&registry, &outbox);

        assert!(!tracker.is_open());
        tracker.on_open();
        assert!(tracker.is_open());
        tracker.on_disconnect(1006);
        assert!(!tracker.is_open());
    }

    #[test]
    fn test_server_close_disposes_tracker() {
        let registry = Arc::new(TrackerRegistry::new());
        let outbox = Arc::new(RecordingOutbox::new(true));
        let tracker = register(&registry, &outbox);

        tracker.on_close(4004, "no such table");

        assert!(!registry.contains("records"));
        assert_eq!(
            tracker.store().closes(),
            vec![(4004, "no such table".to_string())]
        );
    }

    #[test]
    fn test_request_ids_and_dropped_requests() {
        let registry = Arc::new(TrackerRegistry::new());
        let outbox = Arc::new(RecordingOutbox::new(true));
        let tracker = register(&registry, &outbox);

        assert_eq!(tracker.request("count", json!({})), Some(1));
        assert_eq!(tracker.request("count", json!({})), Some(2));

        outbox.set_connected(false);
        assert_eq!(tracker.request("count", json!({})), None);
        assert_eq!(outbox.intents().len(), 2);
    }

    #[test]
    fn test_local_close_sends_intent_and_disposes() {
        let registry = Arc::new(TrackerRegistry::new());
        let outbox = Arc::new(RecordingOutbox::new(true));
        let tracker = register(&registry, &outbox);

        tracker.close();

        assert!(registry.is_empty());
        assert_eq!(
            outbox.intents(),
            vec![ClientIntent::TrackerClose {
                tracker_id: "records".into()
            }]
        );
    }

    #[test]
    fn test_events_forwarded_to_store() {
        let registry = Arc::new(TrackerRegistry::new());
        let outbox = Arc::new(RecordingOutbox::new(true));
        let tracker = register(&registry, &outbox);

        tracker.on_action(&json!({"op": "insert"}), 5);
        tracker.on_emit("presence", &json!({"online": 3}));

        assert_eq!(tracker.store().actions(), vec![(json!({"op": "insert"}), 5)]);
        assert_eq!(
            tracker.store().emits(),
            vec![("presence".to_string(), json!({"online": 3}))]
        );
    }
}
