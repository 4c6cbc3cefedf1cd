//! # trackwire-transport
//!
//! WebSocket transport for the trackwire connection manager.
//!
//! [`WebSocketConnector`] implements `trackwire_core::Connector` on top of
//! tokio-tungstenite, and [`Client`] wires it to a manager whose event loop
//! runs on the current tokio runtime.
//!
//! ```rust,ignore
//! use serde_json::json;
//! use trackwire_transport::Client;
//!
//! let client = Client::builder("https://realtime.example.com")?.spawn();
//! let records = client.create_tracker("records", MyStore::default(), json!({"table": "users"}))?;
//! client.connect("/live");
//! ```
//!
//! Enable the `rustls` feature for `wss://` endpoints.

pub mod client;
pub mod error;
pub mod websocket;

pub use client::{Client, ClientBuilder};
pub use error::TransportError;
pub use websocket::{WebSocketConfig, WebSocketConnector, WebSocketSocket};
