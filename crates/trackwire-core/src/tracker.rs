//! Tracker capability set and per-tracker context.
//!
//! A tracker is one logical channel multiplexed over the shared socket. The
//! router calls into it for every event addressed to its id, and the manager
//! tells it when the transport comes and goes.

use bytes::Bytes;
use serde_json::Value;
use std::sync::Weak;
use trackwire_protocol::{ClientIntent, TrackerId};

use crate::registry::TrackerRegistry;

/// Outbound path available to trackers and the router.
///
/// Delivery is best effort: frames are written only while the socket is open
/// and dropped otherwise.
pub trait Outbox: Send + Sync {
    /// Write an already-encoded frame.
    fn send_frame(&self, frame: Bytes) -> bool;

    /// Encode and write an intent.
    fn send_intent(&self, intent: &ClientIntent) -> bool;

    /// Whether the current socket is open.
    fn is_connected(&self) -> bool;
}

/// Handler for one logical channel.
///
/// Every method has a no-op default so implementations only pick what they
/// need. Callbacks run on the manager's event task and must not block.
pub trait Tracker: Send + Sync {
    /// The transport is open. Trackers replay their own open handshake here.
    fn on_connect(&self) {}

    /// The transport went away with `code`.
    fn on_disconnect(&self, _code: u16) {}

    /// The server accepted this tracker's open handshake.
    fn on_open(&self) {}

    /// The server closed this tracker's channel.
    fn on_close(&self, _code: u16, _message: &str) {}

    /// A store action arrived.
    fn on_action(&self, _action: &Value, _serial: u64) {}

    /// A reply to one of this tracker's API requests arrived.
    fn on_api_response(&self, _api_id: u64, _status: u16, _response: &Value, _params: &Value) {}

    /// A named event arrived.
    fn on_emit(&self, _event: &str, _data: &Value) {}
}

/// Everything a tracker knows about its registration.
#[derive(Clone)]
pub struct TrackerContext {
    id: TrackerId,
    seq: u64,
    outbox: Weak<dyn Outbox>,
    registry: Weak<TrackerRegistry>,
}

impl TrackerContext {
    pub(crate) fn new(
        id: TrackerId,
        seq: u64,
        outbox: Weak<dyn Outbox>,
        registry: Weak<TrackerRegistry>,
    ) -> Self {
        Self {
            id,
            seq,
            outbox,
            registry,
        }
    }

    /// Get the tracker's id.
    #[must_use]
    pub fn id(&self) -> &TrackerId {
        &self.id
    }

    /// Registration sequence number. Increases with every registration.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Write an encoded frame. Dropped unless the socket is open.
    pub fn send_frame(&self, frame: Bytes) -> bool {
        self.outbox
            .upgrade()
            .is_some_and(|outbox| outbox.send_frame(frame))
    }

    /// Encode and write an intent. Dropped unless the socket is open.
    pub fn send_intent(&self, intent: &ClientIntent) -> bool {
        self.outbox
            .upgrade()
            .is_some_and(|outbox| outbox.send_intent(intent))
    }

    /// Whether the shared socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outbox
            .upgrade()
            .is_some_and(|outbox| outbox.is_connected())
    }

    /// Whether this registration is still live.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.registration_seq(self.id.as_str()) == Some(self.seq))
    }

    /// Remove this tracker's registration.
    ///
    /// Only the registration this context was issued for is removed; a later
    /// tracker registered under the same id is left alone. Returns `true` if
    /// something was removed.
    pub fn dispose(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove_registration(&self.id, self.seq))
    }
}

impl std::fmt::Debug for TrackerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerContext")
            .field("id", &self.id)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
