//! # trackwire-protocol
//!
//! Wire protocol definitions for the trackwire multiplexed transport.
//!
//! One socket carries traffic for many trackers. Every frame names the
//! tracker it belongs to, so the client can route it without looking at the
//! payload.
//!
//! ## Inbound events
//!
//! - `tracker-open` / `tracker-close` - Channel handshake and teardown
//! - `tracker-action` - Store actions with a serial number
//! - `tracker-api-response` - Replies to tracker API requests
//! - `tracker-emit` - Free-form named events
//! - `tracker-timestamp-request` - Clock sync request, answered by the client itself
//!
//! ## Example
//!
//! ```rust
//! use trackwire_protocol::{codec, Codec, MsgpackCodec, ServerEvent};
//!
//! let event = ServerEvent::emit("chat:lobby", "message", serde_json::json!({"text": "hi"}));
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = MsgpackCodec.decode(&encoded).unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod events;

pub use codec::{Codec, JsonCodec, MsgpackCodec, ProtocolError};
pub use events::{ClientIntent, EventKind, ServerEvent, TrackerId};
