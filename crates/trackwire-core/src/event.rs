//! Events fed into the connection manager.
//!
//! Sockets and the retry timer never touch manager state directly. They post
//! [`ManagerEvent`]s to one channel and the manager applies them in order, so
//! all state changes happen on a single task.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Generation number of a physical socket.
///
/// A fresh epoch is minted for every socket the manager opens. Events carry
/// the epoch of the socket that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The epoch following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one armed reconnect timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// Something that happened on a socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketSignal {
    /// Handshake completed.
    Open,
    /// A data frame arrived.
    Message(Bytes),
    /// Transport error. Always followed by `Close` on the same socket.
    Error(String),
    /// The socket closed with this code.
    Close(u16),
}

/// Input to the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// A signal from the socket minted at `epoch`.
    Socket {
        /// Epoch of the reporting socket.
        epoch: Epoch,
        /// What happened.
        signal: SocketSignal,
    },
    /// A reconnect timer fired.
    RetryElapsed(TimerToken),
}

impl ManagerEvent {
    /// Create a socket event.
    #[must_use]
    pub fn socket(epoch: Epoch, signal: SocketSignal) -> Self {
        ManagerEvent::Socket { epoch, signal }
    }
}

/// Result of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event changed or was delivered against current state.
    Applied,
    /// The event came from a superseded socket or cancelled timer and was
    /// ignored.
    StaleIgnored,
}

/// Sending half of the manager's event channel.
pub type EventSender = mpsc::UnboundedSender<ManagerEvent>;

/// Receiving half of the manager's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ManagerEvent>;
