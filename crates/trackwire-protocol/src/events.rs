//! Event and intent types for the trackwire protocol.
//!
//! Every frame on the wire is addressed to one tracker. Inbound frames decode
//! into [`ServerEvent`], outbound frames are built from [`ClientIntent`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier naming one logical channel multiplexed over the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackerId(String);

impl TrackerId {
    /// Create a new tracker ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TrackerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TrackerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::borrow::Borrow<str> for TrackerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Inbound event kinds, mostly useful as log and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Action,
    ApiResponse,
    Emit,
    TimestampRequest,
}

impl EventKind {
    /// Stable label for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Action => "action",
            EventKind::ApiResponse => "api_response",
            EventKind::Emit => "emit",
            EventKind::TimestampRequest => "timestamp_request",
        }
    }
}

/// An event sent by the server to one tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// The server accepted the tracker's open handshake.
    TrackerOpen {
        /// Addressed tracker.
        tracker_id: TrackerId,
    },

    /// The server closed the tracker's channel.
    TrackerClose {
        /// Addressed tracker.
        tracker_id: TrackerId,
        /// Close code chosen by the server.
        code: u16,
        /// Human-readable reason.
        message: String,
    },

    /// A store action to apply.
    TrackerAction {
        /// Addressed tracker.
        tracker_id: TrackerId,
        /// Opaque action payload.
        action: Value,
        /// Position of the action in the channel's history.
        serial: u64,
    },

    /// Reply to an API request issued by the tracker.
    TrackerApiResponse {
        /// Addressed tracker.
        tracker_id: TrackerId,
        /// Request identifier chosen by the tracker.
        api_id: u64,
        /// Status code of the call.
        status: u16,
        /// Response body.
        response: Value,
        /// Parameters the request was made with.
        params: Value,
    },

    /// A free-form named event.
    TrackerEmit {
        /// Addressed tracker.
        tracker_id: TrackerId,
        /// Event name.
        event: String,
        /// Event payload.
        data: Value,
    },

    /// The server asks for the client's wall-clock time.
    TrackerTimestampRequest {
        /// Addressed tracker.
        tracker_id: TrackerId,
    },
}

impl ServerEvent {
    /// Get the tracker this event is addressed to.
    #[must_use]
    pub fn tracker_id(&self) -> &TrackerId {
        match self {
            ServerEvent::TrackerOpen { tracker_id }
            | ServerEvent::TrackerClose { tracker_id, .. }
            | ServerEvent::TrackerAction { tracker_id, .. }
            | ServerEvent::TrackerApiResponse { tracker_id, .. }
            | ServerEvent::TrackerEmit { tracker_id, .. }
            | ServerEvent::TrackerTimestampRequest { tracker_id } => tracker_id,
        }
    }

    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::TrackerOpen { .. } => EventKind::Open,
            ServerEvent::TrackerClose { .. } => EventKind::Close,
            ServerEvent::TrackerAction { .. } => EventKind::Action,
            ServerEvent::TrackerApiResponse { .. } => EventKind::ApiResponse,
            ServerEvent::TrackerEmit { .. } => EventKind::Emit,
            ServerEvent::TrackerTimestampRequest { .. } => EventKind::TimestampRequest,
        }
    }

    /// Create a new TrackerEmit event.
    #[must_use]
    pub fn emit(tracker_id: impl Into<TrackerId>, event: impl Into<String>, data: Value) -> Self {
        ServerEvent::TrackerEmit {
            tracker_id: tracker_id.into(),
            event: event.into(),
            data,
        }
    }

    /// Create a new TrackerClose event.
    #[must_use]
    pub fn close(tracker_id: impl Into<TrackerId>, code: u16, message: impl Into<String>) -> Self {
        ServerEvent::TrackerClose {
            tracker_id: tracker_id.into(),
            code,
            message: message.into(),
        }
    }
}

/// An outbound intent addressed to one tracker's server-side counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientIntent {
    /// Open (or re-open after reconnect) a tracker's channel.
    TrackerOpen {
        /// Tracker to open.
        tracker_id: TrackerId,
        /// Parameters the tracker was created with.
        params: Value,
    },

    /// Close a tracker's channel.
    TrackerClose {
        /// Tracker to close.
        tracker_id: TrackerId,
    },

    /// Invoke a server-side API on behalf of a tracker.
    TrackerApiRequest {
        /// Requesting tracker.
        tracker_id: TrackerId,
        /// Identifier echoed back in the response.
        api_id: u64,
        /// API name.
        name: String,
        /// API arguments.
        args: Value,
    },

    /// Reply to a timestamp request.
    TrackerTimestampResponse {
        /// Tracker the request was addressed to.
        tracker_id: TrackerId,
        /// Wall-clock time in milliseconds since the Unix epoch.
        timestamp: u64,
    },
}

impl ClientIntent {
    /// Get the tracker this intent is addressed to.
    #[must_use]
    pub fn tracker_id(&self) -> &TrackerId {
        match self {
            ClientIntent::TrackerOpen { tracker_id, .. }
            | ClientIntent::TrackerClose { tracker_id }
            | ClientIntent::TrackerApiRequest { tracker_id, .. }
            | ClientIntent::TrackerTimestampResponse { tracker_id, .. } => tracker_id,
        }
    }

    /// Create a new TrackerOpen intent.
    #[must_use]
    pub fn open(tracker_id: impl Into<TrackerId>, params: Value) -> Self {
        ClientIntent::TrackerOpen {
            tracker_id: tracker_id.into(),
            params,
        }
    }

    /// Create a new TrackerTimestampResponse intent.
    #[must_use]
    pub fn timestamp_response(tracker_id: impl Into<TrackerId>, timestamp: u64) -> Self {
        ClientIntent::TrackerTimestampResponse {
            tracker_id: tracker_id.into(),
            timestamp,
        }
    }
}
