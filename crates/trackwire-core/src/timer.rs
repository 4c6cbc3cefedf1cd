//! Reconnect timer scheduling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{trace, warn};

use crate::event::{EventSender, ManagerEvent, TimerToken};

/// Arms and cancels reconnect timers.
///
/// A fired timer posts [`ManagerEvent::RetryElapsed`] with its token. The
/// manager ignores tokens it no longer waits for, so `cancel` is allowed to
/// race with firing.
pub trait RetryScheduler: Send + Sync {
    /// Fire `token` after `delay`. Returns false if no timer was armed.
    fn schedule(&self, token: TimerToken, delay: Duration, events: &EventSender) -> bool;

    /// Cancel a pending timer. No-op if it already fired.
    fn cancel(&self, token: TimerToken);
}

/// Scheduler backed by tokio timers.
#[derive(Debug, Default)]
pub struct TokioScheduler {
    pending: Arc<Mutex<HashMap<TimerToken, AbortHandle>>>,
}

impl TokioScheduler {
    /// Create a new scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have neither fired nor been cancelled.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RetryScheduler for TokioScheduler {
    fn schedule(&self, token: TimerToken, delay: Duration, events: &EventSender) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(token = token.0, "No tokio runtime, reconnect timer not armed");
            return false;
        };

        let events = events.clone();
        let pending = Arc::clone(&self.pending);
        // Hold the map lock across spawn so the task cannot remove its entry
        // before it is inserted.
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&token);
            trace!(token = token.0, "Reconnect timer fired");
            let _ = events.send(ManagerEvent::RetryElapsed(token));
        });
        guard.insert(token, handle.abort_handle());
        true
    }

    fn cancel(&self, token: TimerToken) {
        let handle = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token);
        if let Some(handle) = handle {
            trace!(token = token.0, "Reconnect timer cancelled");
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_delay() {
        let scheduler = TokioScheduler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(scheduler.schedule(TimerToken(1), Duration::from_millis(2500), &tx));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(2499)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some(ManagerEvent::RetryElapsed(TimerToken(1))));
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let scheduler = TokioScheduler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(scheduler.schedule(TimerToken(7), Duration::from_millis(100), &tx));
        scheduler.cancel(TimerToken(7));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_schedule_without_runtime_arms_nothing() {
        let scheduler = TokioScheduler::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(!scheduler.schedule(TimerToken(1), Duration::from_millis(10), &tx));
        assert_eq!(scheduler.pending_count(), 0);
    }
}
