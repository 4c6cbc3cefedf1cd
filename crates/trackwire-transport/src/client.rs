//! Ready-to-use client: a connection manager wired to the WebSocket connector
//! with its event loop running on the current tokio runtime.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use trackwire_core::{
    ConnectionManager, Endpoint, EndpointError, ManagerConfig, TokioScheduler,
};
use trackwire_protocol::{Codec, MsgpackCodec};

use crate::websocket::{WebSocketConfig, WebSocketConnector};

/// Builder for [`Client`].
pub struct ClientBuilder {
    endpoint: Endpoint,
    manager: ManagerConfig,
    websocket: WebSocketConfig,
    codec: Arc<dyn Codec>,
}

impl ClientBuilder {
    /// Set the delay before reconnecting after a retryable close.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.manager.retry_interval = interval;
        self
    }

    /// Set the WebSocket configuration.
    #[must_use]
    pub fn websocket(mut self, config: WebSocketConfig) -> Self {
        self.websocket = config;
        self
    }

    /// Set the wire codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Start the client on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(self) -> Client {
        let mut websocket = self.websocket;
        websocket.text_frames = self.codec.text_frames();

        let (manager, events) =
            ConnectionManager::builder(self.endpoint, Arc::new(WebSocketConnector::new(websocket)))
                .config(self.manager)
                .scheduler(Arc::new(TokioScheduler::new()))
                .codec(self.codec)
                .build();

        let driver = manager.clone();
        let task = tokio::spawn(async move { driver.run(events).await });

        info!(endpoint = %manager.endpoint(), "Client started");
        Client { manager, task }
    }
}

/// A running client.
///
/// Dereferences to [`ConnectionManager`] for `connect`, `create_tracker` and
/// the rest. Dropping the client closes the socket and stops its event loop.
pub struct Client {
    manager: ConnectionManager,
    task: JoinHandle<()>,
}

impl Client {
    /// Start building a client for `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if `address` is not a valid base URL.
    pub fn builder(address: &str) -> Result<ClientBuilder, EndpointError> {
        Ok(ClientBuilder {
            endpoint: Endpoint::parse(address)?,
            manager: ManagerConfig::default(),
            websocket: WebSocketConfig::default(),
            codec: Arc::new(MsgpackCodec::new()),
        })
    }

    /// Get the underlying manager.
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl Deref for Client {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.manager.shutdown();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackwire_core::ConnectionState;
    use trackwire_protocol::JsonCodec;

    #[test]
    fn test_invalid_address_rejected() {
        assert!(Client::builder("example.com").is_err());
        assert!(Client::builder("ftp://example.com").is_err());
    }

    #[tokio::test]
    async fn test_spawned_client_starts_idle() {
        let client = Client::builder("http://127.0.0.1:9")
            .unwrap()
            .codec(Arc::new(JsonCodec::new()))
            .retry_interval(Duration::from_millis(100))
            .spawn();

        assert_eq!(client.state(), ConnectionState::Idle);
        assert_eq!(client.endpoint().as_str(), "ws://127.0.0.1:9");
        assert!(!client.is_connected());
    }
}
