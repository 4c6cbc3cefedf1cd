//! WebSocket connector.
//!
//! Each opened socket gets its own tokio task that performs the handshake,
//! pumps frames in both directions and reports everything it observes to the
//! manager's event channel. The socket handle only flips an atomic ready state
//! and queues commands for that task, so it never blocks.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig as WsProtocolConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async_with_config;
use tracing::{debug, trace, warn};
use trackwire_core::{
    Connector, Epoch, EventSender, ManagerEvent, ReadyState, Socket, SocketSignal, CLOSE_ABNORMAL,
    CLOSE_NORMAL, CLOSE_NO_STATUS,
};

use crate::error::TransportError;

/// Upper bound on flushing our close reply once the socket is done.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket connector configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Send outbound frames as text instead of binary.
    pub text_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024, // 16 MB
            connect_timeout: Duration::from_secs(10),
            text_frames: false,
        }
    }
}

/// Opens WebSocket sockets for the connection manager.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, url: &str, epoch: Epoch, events: EventSender) -> Box<dyn Socket> {
        let ready = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (commands, receiver) = mpsc::unbounded_channel();

        let link = SocketLink {
            epoch,
            ready: Arc::clone(&ready),
            events,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_socket(
                    url.to_string(),
                    self.config.clone(),
                    link,
                    receiver,
                ));
            }
            Err(_) => {
                warn!(epoch = %epoch, url = %url, "Cannot open socket outside a tokio runtime");
                link.fail(&TransportError::NoRuntime);
            }
        }

        Box::new(WebSocketSocket {
            epoch,
            ready,
            commands,
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

enum Command {
    Send(Bytes),
    Close(u16),
}

/// Handle to one WebSocket.
pub struct WebSocketSocket {
    epoch: Epoch,
    ready: Arc<AtomicU8>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Socket for WebSocketSocket {
    fn epoch(&self) -> Epoch {
        self.epoch
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.ready.load(Ordering::SeqCst))
    }

    fn send(&self, frame: Bytes) -> bool {
        if self.ready_state() != ReadyState::Open {
            return false;
        }
        self.commands.send(Command::Send(frame)).is_ok()
    }

    fn close(&self, code: u16) {
        let previous = self.ready.swap(ReadyState::Closing as u8, Ordering::SeqCst);
        if ReadyState::from(previous) == ReadyState::Closed {
            self.ready.store(ReadyState::Closed as u8, Ordering::SeqCst);
            return;
        }
        let _ = self.commands.send(Command::Close(code));
    }
}

impl std::fmt::Debug for WebSocketSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSocket")
            .field("epoch", &self.epoch)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// What the I/O task shares with its socket handle and the manager.
struct SocketLink {
    epoch: Epoch,
    ready: Arc<AtomicU8>,
    events: EventSender,
}

impl SocketLink {
    fn signal(&self, signal: SocketSignal) {
        // The manager is gone; nobody is listening any more.
        let _ = self.events.send(ManagerEvent::socket(self.epoch, signal));
    }

    fn opened(&self) {
        self.ready.store(ReadyState::Open as u8, Ordering::SeqCst);
        self.signal(SocketSignal::Open);
    }

    fn closed(&self, code: u16) {
        self.ready.store(ReadyState::Closed as u8, Ordering::SeqCst);
        self.signal(SocketSignal::Close(code));
    }

    fn fail(&self, error: &TransportError) {
        self.signal(SocketSignal::Error(error.to_string()));
        self.closed(CLOSE_ABNORMAL);
    }
}

async fn run_socket(
    url: String,
    config: WebSocketConfig,
    link: SocketLink,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut protocol = WsProtocolConfig::default();
    protocol.max_message_size = Some(config.max_message_size);
    protocol.max_frame_size = Some(config.max_message_size);

    debug!(epoch = %link.epoch, url = %url, "Connecting");
    let handshake = timeout(
        config.connect_timeout,
        connect_async_with_config(url.as_str(), Some(protocol), true),
    );
    tokio::pin!(handshake);

    let stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok(Ok((stream, _response))) => break stream,
                Ok(Err(e)) => {
                    let error = TransportError::from(e);
                    debug!(epoch = %link.epoch, url = %url, error = %error, "Handshake failed");
                    link.fail(&error);
                    return;
                }
                Err(_) => {
                    let error = TransportError::Timeout(config.connect_timeout);
                    debug!(epoch = %link.epoch, url = %url, error = %error, "Handshake failed");
                    link.fail(&error);
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(_)) => continue,
                Some(Command::Close(code)) => {
                    debug!(epoch = %link.epoch, code, "Closed before handshake finished");
                    link.closed(code);
                    return;
                }
                None => {
                    link.closed(CLOSE_NORMAL);
                    return;
                }
            },
        }
    };

    link.opened();
    debug!(epoch = %link.epoch, url = %url, "WebSocket handshake completed");

    let (mut sink, mut stream) = stream.split();

    let code = loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    trace!(epoch = %link.epoch, bytes = data.len(), "Received binary frame");
                    link.signal(SocketSignal::Message(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    trace!(epoch = %link.epoch, bytes = text.len(), "Received text frame");
                    link.signal(SocketSignal::Message(Bytes::from(text.into_bytes())));
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        warn!(epoch = %link.epoch, error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map_or(CLOSE_NO_STATUS, |frame| u16::from(frame.code));
                    debug!(epoch = %link.epoch, code, "Received close frame");
                    break code;
                }
                Some(Err(e)) => {
                    link.signal(SocketSignal::Error(TransportError::from(e).to_string()));
                    break CLOSE_ABNORMAL;
                }
                None => {
                    link.signal(SocketSignal::Error(TransportError::ConnectionLost.to_string()));
                    break CLOSE_ABNORMAL;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    let message = if config.text_frames {
                        match String::from_utf8(frame.to_vec()) {
                            Ok(text) => Message::Text(text),
                            Err(e) => Message::Binary(e.into_bytes()),
                        }
                    } else {
                        Message::Binary(frame.to_vec())
                    };
                    if let Err(e) = sink.send(message).await {
                        link.signal(SocketSignal::Error(TransportError::from(e).to_string()));
                        break CLOSE_ABNORMAL;
                    }
                }
                Some(Command::Close(code)) => {
                    debug!(epoch = %link.epoch, code, "Closing socket");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break code;
                }
                None => break CLOSE_NORMAL,
            },
        }
    };

    let _ = timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await;
    link.closed(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::error::TryRecvError;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(!config.text_frames);
    }

    #[test]
    fn test_open_without_runtime_fails_fast() {
        let (events, mut receiver) = mpsc::unbounded_channel();
        let socket = WebSocketConnector::default().open("ws://127.0.0.1:1/", Epoch(7), events);

        assert_eq!(socket.ready_state(), ReadyState::Closed);
        assert!(matches!(
            receiver.try_recv(),
            Ok(ManagerEvent::Socket { epoch: Epoch(7), signal: SocketSignal::Error(_) })
        ));
        assert_eq!(
            receiver.try_recv(),
            Ok(ManagerEvent::socket(Epoch(7), SocketSignal::Close(CLOSE_ABNORMAL)))
        );
        assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_refused_connection_reports_abnormal_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (events, mut receiver) = mpsc::unbounded_channel();
        let socket = WebSocketConnector::default().open(&format!("ws://{}/", addr), Epoch(1), events);
        assert!(!socket.send(Bytes::from_static(b"early")));

        let first = receiver.recv().await.unwrap();
        assert!(matches!(
            first,
            ManagerEvent::Socket { signal: SocketSignal::Error(_), .. }
        ));
        assert_eq!(
            receiver.recv().await.unwrap(),
            ManagerEvent::socket(Epoch(1), SocketSignal::Close(CLOSE_ABNORMAL))
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
    }
}
