//! Connection lifecycle manager.
//!
//! The manager owns at most one physical socket, keeps it connected to the
//! current path, and multiplexes trackers over it.
//!
//! ## States
//!
//! ```text
//!            connect                open
//!   Idle ─────────────▶ Connecting ──────▶ Open
//!    ▲                     ▲   ▲             │
//!    │ clear_path          │   │ timer       │ close(code)
//!    │                     │   │             ▼
//!    │           reconnect │   └──── ClosedPendingRetry   (retryable code)
//!    └─────────────────────┴──────── ClosedTerminal       (1000, 1005, 4001, close())
//! ```
//!
//! Every socket is tagged with the epoch it was opened under. Socket events
//! are applied only while their epoch belongs to the socket currently in the
//! slot; anything else is a stale callback and is ignored.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};
use trackwire_protocol::{ClientIntent, Codec, MsgpackCodec, TrackerId};

use crate::endpoint::Endpoint;
use crate::event::{
    Epoch, EventOutcome, EventReceiver, EventSender, ManagerEvent, SocketSignal, TimerToken,
};
use crate::lifecycle::{Lifecycle, LifecycleEvent, LifecycleKind, ListenerId};
use crate::registry::{self, RegistryError, TrackerRegistry};
use crate::socket::{Connector, ReadyState, Socket};
use crate::store::{StoreTracker, TrackerStore};
use crate::timer::{RetryScheduler, TokioScheduler};
use crate::tracker::{Outbox, Tracker, TrackerContext};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// No status code was present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// The connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// The server ended the session; reconnecting would be rejected.
pub const CLOSE_SESSION_EXPIRED: u16 = 4001;

/// Default delay before reconnecting after a retryable close.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(2500);

/// What to do after a socket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Stay closed.
    Terminal,
    /// Reconnect after the retry interval.
    Retry,
}

/// Classify a close code.
#[must_use]
pub fn close_policy(code: u16) -> ClosePolicy {
    match code {
        CLOSE_NORMAL | CLOSE_NO_STATUS | CLOSE_SESSION_EXPIRED => ClosePolicy::Terminal,
        _ => ClosePolicy::Retry,
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No path, no socket.
    Idle,
    /// A socket was opened and has not completed its handshake.
    Connecting,
    /// The socket is open.
    Open,
    /// The socket closed and a reconnect timer is armed.
    ClosedPendingRetry,
    /// The socket closed and no reconnect will happen on its own.
    ClosedTerminal,
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Delay before reconnecting after a retryable close.
    pub retry_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Result of [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Already open on the same target; nothing was done.
    AlreadyConnected,
    /// A new socket is being opened.
    Connecting,
}

/// Reasons [`ConnectionManager::reconnect`] does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReconnectError {
    /// No path has been connected to.
    #[error("No path to reconnect to")]
    NoPath,

    /// The current socket is still connecting.
    #[error("A connection attempt is already in progress")]
    Connecting,
}

/// Manager statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// Current state.
    pub state: ConnectionState,
    /// Epoch of the most recently opened socket.
    pub epoch: Epoch,
    /// Target URL, if a connection is desired.
    pub path: Option<String>,
    /// Number of registered trackers.
    pub tracker_count: usize,
    /// Whether a reconnect timer is armed.
    pub retry_pending: bool,
}

struct State {
    path: Option<String>,
    socket: Option<Box<dyn Socket>>,
    epoch: Epoch,
    phase: ConnectionState,
    retry: Option<TimerToken>,
    next_timer: u64,
}

impl State {
    fn is_current(&self, epoch: Epoch) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|socket| socket.epoch() == epoch)
    }

    /// Open means both that the manager applied the socket's open event and
    /// that the socket itself still reports open.
    fn socket_open(&self) -> bool {
        self.phase == ConnectionState::Open
            && self.socket.as_ref().is_some_and(|socket| {
                socket.epoch() == self.epoch && socket.ready_state() == ReadyState::Open
            })
    }
}

/// Notification computed under the state lock and delivered after it is
/// released. The recipients are sampled under the lock, so a tracker
/// registered concurrently is told about a transition exactly once.
enum Notice {
    Connect(Vec<Arc<dyn Tracker>>),
    Disconnect(u16, Vec<Arc<dyn Tracker>>),
}

struct Inner {
    endpoint: Endpoint,
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    scheduler: Arc<dyn RetryScheduler>,
    codec: Arc<dyn Codec>,
    events: EventSender,
    stopped: watch::Sender<bool>,
    state: Mutex<State>,
    registry: Arc<TrackerRegistry>,
    lifecycle: Lifecycle,
}

/// Builder for [`ConnectionManager`].
pub struct ManagerBuilder {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    config: ManagerConfig,
    scheduler: Option<Arc<dyn RetryScheduler>>,
    codec: Option<Arc<dyn Codec>>,
}

impl ManagerBuilder {
    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the reconnect timer scheduler. Defaults to [`TokioScheduler`].
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn RetryScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the codec. Defaults to [`MsgpackCodec`].
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Build the manager.
    ///
    /// The returned receiver must be driven with [`ConnectionManager::run`]
    /// (or fed to [`ConnectionManager::handle_event`]) for sockets and timers
    /// to have any effect.
    #[must_use]
    pub fn build(self) -> (ConnectionManager, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let codec = self.codec.unwrap_or_else(|| Arc::new(MsgpackCodec::new()));

        info!(
            endpoint = %self.endpoint,
            connector = self.connector.name(),
            codec = codec.name(),
            retry_ms = self.config.retry_interval.as_millis() as u64,
            "Creating connection manager"
        );

        let inner = Inner {
            endpoint: self.endpoint,
            config: self.config,
            connector: self.connector,
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Arc::new(TokioScheduler::new())),
            codec,
            events,
            stopped: watch::channel(false).0,
            state: Mutex::new(State {
                path: None,
                socket: None,
                epoch: Epoch::default(),
                phase: ConnectionState::Idle,
                retry: None,
                next_timer: 0,
            }),
            registry: Arc::new(TrackerRegistry::new()),
            lifecycle: Lifecycle::new(),
        };

        (
            ConnectionManager {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }
}

/// Handle to a connection manager. Clones share the same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Start building a manager for `endpoint`.
    #[must_use]
    pub fn builder(endpoint: Endpoint, connector: Arc<dyn Connector>) -> ManagerBuilder {
        ManagerBuilder {
            endpoint,
            connector,
            config: ManagerConfig::default(),
            scheduler: None,
            codec: None,
        }
    }

    /// Get the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Keep a socket connected to `path`.
    ///
    /// No-op if already open on the same target. Otherwise any existing
    /// socket is superseded and a new one is opened.
    pub fn connect(&self, path: &str) -> ConnectOutcome {
        let url = self.inner.endpoint.resolve(path);
        let notice = {
            let mut state = self.inner.lock();
            if state.phase == ConnectionState::Open
                && state.path.as_deref() == Some(url.as_str())
                && state.socket_open()
            {
                debug!(url = %url, epoch = %state.epoch, "Already connected");
                return ConnectOutcome::AlreadyConnected;
            }

            let notice = self.inner.supersede(&mut state, CLOSE_NORMAL);
            state.path = Some(url.clone());
            self.inner.open_socket(&mut state, &url);
            notice
        };

        self.inner.notify(notice);
        ConnectOutcome::Connecting
    }

    /// Replace the current socket with a fresh one to the same path.
    ///
    /// # Errors
    ///
    /// Returns an error, and does nothing, if no path is set or the current
    /// socket is still connecting.
    pub fn reconnect(&self) -> Result<(), ReconnectError> {
        let notice = {
            let mut state = self.inner.lock();
            let Some(url) = state.path.clone() else {
                return Err(ReconnectError::NoPath);
            };
            if state.phase == ConnectionState::Connecting {
                return Err(ReconnectError::Connecting);
            }

            info!(url = %url, "Manual reconnect");
            let notice = self.inner.supersede(&mut state, CLOSE_NORMAL);
            self.inner.open_socket(&mut state, &url);
            notice
        };

        self.inner.notify(notice);
        Ok(())
    }

    /// Forget the path, close any socket and return to idle.
    pub fn clear_path(&self) {
        let notice = {
            let mut state = self.inner.lock();
            state.path = None;
            let notice = self.inner.supersede(&mut state, CLOSE_NORMAL);
            state.phase = ConnectionState::Idle;
            debug!("Path cleared");
            notice
        };

        self.inner.notify(notice);
    }

    /// Close the socket without forgetting the path.
    ///
    /// No reconnect happens on its own afterwards; [`Self::reconnect`] still
    /// works.
    pub fn close(&self) {
        let notice = {
            let mut state = self.inner.lock();
            let notice = self.inner.supersede(&mut state, CLOSE_NORMAL);
            state.phase = if state.path.is_some() {
                ConnectionState::ClosedTerminal
            } else {
                ConnectionState::Idle
            };
            debug!("Connection closed locally");
            notice
        };

        self.inner.notify(notice);
    }

    /// Write a frame if the socket is open, otherwise drop it.
    pub fn send(&self, frame: Bytes) -> bool {
        self.inner.send_frame(frame)
    }

    /// Encode and write an intent if the socket is open.
    pub fn send_intent(&self, intent: &ClientIntent) -> bool {
        self.inner.send_intent(intent)
    }

    /// Whether the current socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock().socket_open()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().phase
    }

    /// Epoch of the most recently opened socket.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.inner.lock().epoch
    }

    /// Target URL, if a connection is desired.
    #[must_use]
    pub fn path(&self) -> Option<String> {
        self.inner.lock().path.clone()
    }

    /// Get manager statistics.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        let state = self.inner.lock();
        ManagerStats {
            state: state.phase,
            epoch: state.epoch,
            path: state.path.clone(),
            tracker_count: self.inner.registry.len(),
            retry_pending: state.retry.is_some(),
        }
    }

    /// Create a store-backed tracker.
    ///
    /// If the socket is already open the tracker sends its open handshake
    /// right away; otherwise it does so on the next connect.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTracker`] if `id` is taken.
    pub fn create_tracker<S: TrackerStore>(
        &self,
        id: impl Into<TrackerId>,
        store: S,
        params: Value,
    ) -> Result<Arc<StoreTracker<S>>, RegistryError> {
        self.register_tracker(id, |context| StoreTracker::new(context, store, params))
    }

    /// Register a custom tracker.
    ///
    /// `build` runs while the manager's state is locked and must not call
    /// back into the manager.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTracker`] if `id` is taken.
    pub fn register_tracker<T, F>(
        &self,
        id: impl Into<TrackerId>,
        build: F,
    ) -> Result<Arc<T>, RegistryError>
    where
        T: Tracker + 'static,
        F: FnOnce(TrackerContext) -> T,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let outbox: Weak<dyn Outbox> = weak;
        let (tracker, connected) = {
            // Registering under the state lock orders this against the
            // sampling of connect recipients.
            let state = self.inner.lock();
            let tracker = self.inner.registry.register(id, outbox, build)?;
            (tracker, state.socket_open())
        };
        if connected {
            tracker.on_connect();
        }
        Ok(tracker)
    }

    /// Remove a tracker. No-op if absent.
    pub fn remove_tracker(&self, id: &str) -> bool {
        self.inner.registry.remove(id)
    }

    /// Get the tracker registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TrackerRegistry> {
        &self.inner.registry
    }

    /// Register a lifecycle listener.
    pub fn on<F>(&self, kind: LifecycleKind, listener: F) -> ListenerId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.inner.lifecycle.on(kind, listener)
    }

    /// Remove a lifecycle listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.lifecycle.off(id)
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Close the socket, forget the path and drop every tracker.
    ///
    /// Any [`Self::run`] loop returns; events queued after this are not
    /// applied.
    pub fn shutdown(&self) {
        self.clear_path();
        self.inner.registry.clear();
        self.inner.stopped.send_replace(true);
        info!("Connection manager shut down");
    }

    /// Apply one event from a socket or timer.
    pub fn handle_event(&self, event: ManagerEvent) -> EventOutcome {
        match event {
            ManagerEvent::Socket { epoch, signal } => self.handle_socket(epoch, signal),
            ManagerEvent::RetryElapsed(token) => self.handle_retry(token),
        }
    }

    /// Apply events until [`Self::shutdown`] is called.
    ///
    /// The manager holds a sender of its own, so the channel never closes
    /// while the manager is alive.
    pub async fn run(&self, mut events: EventReceiver) {
        let mut stopped = self.inner.stopped.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => break,
                },
                _ = stopped.wait_for(|stopped| *stopped) => break,
            }
        }
        debug!("Manager event loop stopped");
    }

    fn handle_socket(&self, epoch: Epoch, signal: SocketSignal) -> EventOutcome {
        match signal {
            SocketSignal::Open => {
                let notice = {
                    let mut state = self.inner.lock();
                    if !state.is_current(epoch) {
                        debug!(epoch = %epoch, current = %state.epoch, "Ignoring open from stale socket");
                        return EventOutcome::StaleIgnored;
                    }
                    self.inner.cancel_retry(&mut state);
                    state.phase = ConnectionState::Open;
                    info!(epoch = %epoch, path = ?state.path, "Connected");
                    Notice::Connect(self.inner.registry.trackers())
                };
                self.inner.notify(Some(notice));
                EventOutcome::Applied
            }

            SocketSignal::Message(frame) => {
                if !self.inner.lock().is_current(epoch) {
                    trace!(epoch = %epoch, "Dropping frame from stale socket");
                    return EventOutcome::StaleIgnored;
                }
                match self.inner.codec.decode(&frame) {
                    Ok(event) => {
                        let outcome = self.inner.registry.route(event, self.inner.as_ref());
                        trace!(epoch = %epoch, ?outcome, "Routed frame");
                    }
                    Err(e) => {
                        warn!(epoch = %epoch, error = %e, bytes = frame.len(), "Undecodable frame");
                    }
                }
                EventOutcome::Applied
            }

            SocketSignal::Error(error) => {
                if !self.inner.lock().is_current(epoch) {
                    debug!(epoch = %epoch, error = %error, "Ignoring error from stale socket");
                    return EventOutcome::StaleIgnored;
                }
                warn!(epoch = %epoch, error = %error, "Socket error");
                EventOutcome::Applied
            }

            SocketSignal::Close(code) => {
                let notice = {
                    let mut state = self.inner.lock();
                    if !state.is_current(epoch) {
                        debug!(epoch = %epoch, code, "Ignoring close from stale socket");
                        return EventOutcome::StaleIgnored;
                    }
                    state.socket = None;
                    let was_open = state.phase == ConnectionState::Open;

                    match close_policy(code) {
                        ClosePolicy::Terminal => {
                            state.phase = ConnectionState::ClosedTerminal;
                            info!(epoch = %epoch, code, "Connection closed");
                        }
                        ClosePolicy::Retry => {
                            if self.inner.arm_retry(&mut state) {
                                state.phase = ConnectionState::ClosedPendingRetry;
                                warn!(
                                    epoch = %epoch,
                                    code,
                                    retry_ms = self.inner.config.retry_interval.as_millis() as u64,
                                    "Connection lost, reconnect scheduled"
                                );
                            } else {
                                state.phase = ConnectionState::ClosedTerminal;
                                warn!(epoch = %epoch, code, "Connection lost, reconnect could not be scheduled");
                            }
                        }
                    }

                    was_open.then(|| Notice::Disconnect(code, self.inner.registry.trackers()))
                };
                self.inner.notify(notice);
                EventOutcome::Applied
            }
        }
    }

    fn handle_retry(&self, token: TimerToken) -> EventOutcome {
        let mut state = self.inner.lock();
        if state.retry != Some(token) {
            trace!(token = token.0, "Ignoring cancelled reconnect timer");
            return EventOutcome::StaleIgnored;
        }
        state.retry = None;

        if state.phase != ConnectionState::ClosedPendingRetry {
            return EventOutcome::Applied;
        }
        if let Some(url) = state.path.clone() {
            info!(url = %url, "Reconnecting");
            self.inner.open_socket(&mut state, &url);
        }
        EventOutcome::Applied
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the socket in the slot, invalidating its epoch. Returns a
    /// disconnect notice if it was open.
    fn supersede(&self, state: &mut State, code: u16) -> Option<Notice> {
        self.cancel_retry(state);
        let was_open = state.phase == ConnectionState::Open;
        if let Some(socket) = state.socket.take() {
            debug!(epoch = %socket.epoch(), code, "Superseding socket");
            socket.close(code);
        }
        was_open.then(|| Notice::Disconnect(code, self.registry.trackers()))
    }

    fn open_socket(&self, state: &mut State, url: &str) {
        state.epoch = state.epoch.next();
        debug!(epoch = %state.epoch, url = %url, "Opening socket");
        let socket = self.connector.open(url, state.epoch, self.events.clone());
        state.socket = Some(socket);
        state.phase = ConnectionState::Connecting;
    }

    /// Returns whether a reconnect timer is pending afterwards.
    fn arm_retry(&self, state: &mut State) -> bool {
        if state.retry.is_some() {
            return true;
        }
        state.next_timer += 1;
        let token = TimerToken(state.next_timer);
        if self
            .scheduler
            .schedule(token, self.config.retry_interval, &self.events)
        {
            state.retry = Some(token);
        }
        state.retry.is_some()
    }

    fn cancel_retry(&self, state: &mut State) {
        if let Some(token) = state.retry.take() {
            self.scheduler.cancel(token);
        }
    }

    fn notify(&self, notice: Option<Notice>) {
        match notice {
            Some(Notice::Connect(trackers)) => {
                registry::connect_all(&trackers);
                self.lifecycle.emit(LifecycleEvent::Connect);
            }
            Some(Notice::Disconnect(code, trackers)) => {
                registry::disconnect_all(&trackers, code);
                self.lifecycle.emit(LifecycleEvent::Disconnect { code });
            }
            None => {}
        }
    }
}

impl Outbox for Inner {
    fn send_frame(&self, frame: Bytes) -> bool {
        let state = self.lock();
        match &state.socket {
            Some(socket) if state.socket_open() => {
                socket.send(frame)
            }
            _ => {
                trace!(bytes = frame.len(), state = ?state.phase, "Dropping frame, socket not open");
                false
            }
        }
    }

    fn send_intent(&self, intent: &ClientIntent) -> bool {
        match self.codec.encode(intent) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => {
                warn!(tracker = %intent.tracker_id(), error = %e, "Failed to encode intent");
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().socket_open()
    }
}
