//! Connect/disconnect lifecycle notifications.
//!
//! Listeners can be registered per kind with [`Lifecycle::on`], or an async
//! consumer can take a broadcast receiver with [`Lifecycle::subscribe`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast capacity for lifecycle receivers.
const LIFECYCLE_CAPACITY: usize = 64;

/// A transport availability change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LifecycleEvent {
    /// A socket finished its handshake.
    Connect,
    /// The open socket went away.
    Disconnect {
        /// Close code of the socket.
        code: u16,
    },
}

impl LifecycleEvent {
    /// Get the kind of this event.
    #[must_use]
    pub fn kind(&self) -> LifecycleKind {
        match self {
            LifecycleEvent::Connect => LifecycleKind::Connect,
            LifecycleEvent::Disconnect { .. } => LifecycleKind::Disconnect,
        }
    }
}

/// Lifecycle event kinds a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    Connect,
    Disconnect,
}

/// Handle returned by [`Lifecycle::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Lifecycle listener registry.
pub struct Lifecycle {
    listeners: Mutex<Vec<(ListenerId, LifecycleKind, Listener)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Lifecycle {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register a listener for one kind of event.
    pub fn on<F>(&self, kind: LifecycleKind, listener: F) -> ListenerId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind, Arc::new(listener)));
        id
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the listener was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Subscribe to all lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to matching listeners and broadcast receivers.
    ///
    /// Listeners run without the registry lock held, so they may call
    /// `on`/`off` themselves.
    pub fn emit(&self, event: LifecycleEvent) {
        let kind = event.kind();
        let matching: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        trace!(?event, listeners = matching.len(), "Emitting lifecycle event");

        for listener in matching {
            listener(&event);
        }
        let _ = self.sender.send(event);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listeners_by_kind() {
        let lifecycle = Lifecycle::new();
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&connects);
        lifecycle.on(LifecycleKind::Connect, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let d = Arc::clone(&disconnects);
        lifecycle.on(LifecycleKind::Disconnect, move |event| {
            if let LifecycleEvent::Disconnect { code } = event {
                d.lock().unwrap().push(*code);
            }
        });

        lifecycle.emit(LifecycleEvent::Connect);
        lifecycle.emit(LifecycleEvent::Disconnect { code: 1006 });

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(*disconnects.lock().unwrap(), vec![1006]);
    }

    #[test]
    fn test_off_removes_listener() {
        let lifecycle = Lifecycle::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let id = lifecycle.on(LifecycleKind::Connect, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(lifecycle.off(id));
        assert!(!lifecycle.off(id));

        lifecycle.emit(LifecycleEvent::Connect);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_subscription() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();

        lifecycle.emit(LifecycleEvent::Disconnect { code: 4001 });
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Disconnect { code: 4001 });
    }
}
