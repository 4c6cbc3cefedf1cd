//! In-memory doubles for unit tests.

use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trackwire_protocol::ClientIntent;

use crate::event::{Epoch, EventSender, TimerToken};
use crate::socket::{Connector, ReadyState, Socket};
use crate::store::TrackerStore;
use crate::timer::RetryScheduler;
use crate::tracker::{Outbox, Tracker, TrackerContext};

/// Outbox that records what it was asked to send.
pub struct RecordingOutbox {
    connected: AtomicBool,
    frames: Mutex<Vec<Bytes>>,
    intents: Mutex<Vec<ClientIntent>>,
}

impl RecordingOutbox {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            frames: Mutex::new(Vec::new()),
            intents: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn intents(&self) -> Vec<ClientIntent> {
        self.intents.lock().unwrap().clone()
    }
}

impl Outbox for RecordingOutbox {
    fn send_frame(&self, frame: Bytes) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.frames.lock().unwrap().push(frame);
        true
    }

    fn send_intent(&self, intent: &ClientIntent) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.intents.lock().unwrap().push(intent.clone());
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A tracker callback, as observed by [`RecordingTracker`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerCall {
    Connect,
    Disconnect(u16),
    Open,
    Close(u16, String),
    Action(Value, u64),
    ApiResponse(u64, u16),
    Emit(String, Value),
}

/// Tracker that records every callback.
pub struct RecordingTracker {
    context: TrackerContext,
    calls: Mutex<Vec<TrackerCall>>,
    order: Option<Arc<Mutex<Vec<String>>>>,
    dispose_on_disconnect: bool,
}

impl RecordingTracker {
    pub fn new(context: TrackerContext) -> Self {
        Self {
            context,
            calls: Mutex::new(Vec::new()),
            order: None,
            dispose_on_disconnect: false,
        }
    }

    /// Also append `connect:<id>` / `disconnect:<id>` to a shared log.
    pub fn with_order_log(mut self, order: Arc<Mutex<Vec<String>>>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn dispose_on_disconnect(mut self) -> Self {
        self.dispose_on_disconnect = true;
        self
    }

    pub fn context(&self) -> &TrackerContext {
        &self.context
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: TrackerCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn log(&self, what: &str) {
        if let Some(order) = &self.order {
            order
                .lock()
                .unwrap()
                .push(format!("{}:{}", what, self.context.id()));
        }
    }
}

impl Tracker for RecordingTracker {
    fn on_connect(&self) {
        self.log("connect");
        self.record(TrackerCall::Connect);
    }

    fn on_disconnect(&self, code: u16) {
        self.log("disconnect");
        self.record(TrackerCall::Disconnect(code));
        if self.dispose_on_disconnect {
            self.context.dispose();
        }
    }

    fn on_open(&self) {
        self.record(TrackerCall::Open);
    }

    fn on_close(&self, code: u16, message: &str) {
        self.record(TrackerCall::Close(code, message.to_string()));
    }

    fn on_action(&self, action: &Value, serial: u64) {
        self.record(TrackerCall::Action(action.clone(), serial));
    }

    fn on_api_response(&self, api_id: u64, status: u16, _response: &Value, _params: &Value) {
        self.record(TrackerCall::ApiResponse(api_id, status));
    }

    fn on_emit(&self, event: &str, data: &Value) {
        self.record(TrackerCall::Emit(event.to_string(), data.clone()));
    }
}

/// Store that records what it was told.
#[derive(Default)]
pub struct RecordingStore {
    actions: Mutex<Vec<(Value, u64)>>,
    emits: Mutex<Vec<(String, Value)>>,
    closes: Mutex<Vec<(u16, String)>>,
    connectivity: Mutex<Vec<bool>>,
}

impl RecordingStore {
    pub fn actions(&self) -> Vec<(Value, u64)> {
        self.actions.lock().unwrap().clone()
    }

    pub fn emits(&self) -> Vec<(String, Value)> {
        self.emits.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().unwrap().clone()
    }

    pub fn connectivity(&self) -> Vec<bool> {
        self.connectivity.lock().unwrap().clone()
    }
}

impl TrackerStore for RecordingStore {
    fn apply_action(&self, action: &Value, serial: u64) {
        self.actions.lock().unwrap().push((action.clone(), serial));
    }

    fn on_close(&self, code: u16, message: &str) {
        self.closes.lock().unwrap().push((code, message.to_string()));
    }

    fn on_emit(&self, event: &str, data: &Value) {
        self.emits.lock().unwrap().push((event.to_string(), data.clone()));
    }

    fn on_connectivity(&self, connected: bool) {
        self.connectivity.lock().unwrap().push(connected);
    }
}

/// Shared state of a socket opened by [`FakeConnector`].
pub struct FakeSocketState {
    pub url: String,
    pub epoch: Epoch,
    ready: AtomicU8,
    sent: Mutex<Vec<Bytes>>,
    closed_with: Mutex<Option<u16>>,
}

impl FakeSocketState {
    /// Pretend the handshake completed.
    pub fn set_open(&self) {
        self.ready.store(ReadyState::Open as u8, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap()
    }
}

struct FakeSocket(Arc<FakeSocketState>);

impl Socket for FakeSocket {
    fn epoch(&self) -> Epoch {
        self.0.epoch
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.0.ready.load(Ordering::SeqCst))
    }

    fn send(&self, frame: Bytes) -> bool {
        if self.ready_state() != ReadyState::Open {
            return false;
        }
        self.0.sent.lock().unwrap().push(frame);
        true
    }

    fn close(&self, code: u16) {
        self.0
            .ready
            .store(ReadyState::Closing as u8, Ordering::SeqCst);
        *self.0.closed_with.lock().unwrap() = Some(code);
    }
}

/// Connector that hands out in-memory sockets and never does I/O.
#[derive(Default)]
pub struct FakeConnector {
    opened: Mutex<Vec<Arc<FakeSocketState>>>,
}

impl FakeConnector {
    pub fn opened(&self) -> Vec<Arc<FakeSocketState>> {
        self.opened.lock().unwrap().clone()
    }

    pub fn socket(&self, index: usize) -> Arc<FakeSocketState> {
        Arc::clone(&self.opened.lock().unwrap()[index])
    }

    pub fn count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

impl Connector for FakeConnector {
    fn open(&self, url: &str, epoch: Epoch, _events: EventSender) -> Box<dyn Socket> {
        let state = Arc::new(FakeSocketState {
            url: url.to_string(),
            epoch,
            ready: AtomicU8::new(ReadyState::Connecting as u8),
            sent: Mutex::new(Vec::new()),
            closed_with: Mutex::new(None),
        });
        self.opened.lock().unwrap().push(Arc::clone(&state));
        Box::new(FakeSocket(state))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Scheduler that records requests instead of sleeping.
#[derive(Default)]
pub struct FakeScheduler {
    scheduled: Mutex<Vec<(TimerToken, Duration)>>,
    cancelled: Mutex<Vec<TimerToken>>,
    refuse: bool,
}

impl FakeScheduler {
    /// A scheduler that never manages to arm a timer.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn scheduled(&self) -> Vec<(TimerToken, Duration)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<TimerToken> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl RetryScheduler for FakeScheduler {
    fn schedule(&self, token: TimerToken, delay: Duration, _events: &EventSender) -> bool {
        if self.refuse {
            return false;
        }
        self.scheduled.lock().unwrap().push((token, delay));
        true
    }

    fn cancel(&self, token: TimerToken) {
        self.cancelled.lock().unwrap().push(token);
    }
}
