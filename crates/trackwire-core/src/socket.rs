//! Socket abstraction used by the connection manager.
//!
//! The manager never performs I/O itself. A [`Connector`] opens sockets and
//! each socket reports back through the manager's event channel, tagged with
//! the epoch it was opened under.

use bytes::Bytes;

use crate::event::{Epoch, EventSender};

/// Ready state of a physical socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ReadyState {
    fn from(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// One physical socket.
///
/// All methods are non-blocking. Implementations queue work for their own
/// I/O task and report the outcome as events.
pub trait Socket: Send + Sync {
    /// Epoch this socket was opened under.
    fn epoch(&self) -> Epoch;

    /// Current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Queue a frame for writing.
    ///
    /// Returns `false` if the frame was dropped.
    fn send(&self, frame: Bytes) -> bool;

    /// Start closing the socket with the given code.
    fn close(&self, code: u16);
}

/// Opens sockets on behalf of the manager.
pub trait Connector: Send + Sync {
    /// Open a socket to `url`.
    ///
    /// The socket must report `Open`, `Message`, `Error` and `Close` signals
    /// for `epoch` on `events`, in the order the transport observes them.
    fn open(&self, url: &str, epoch: Epoch, events: EventSender) -> Box<dyn Socket>;

    /// Connector name for logs.
    fn name(&self) -> &'static str;
}
