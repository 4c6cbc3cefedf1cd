//! # trackwire-core
//!
//! Connection lifecycle and tracker routing for the trackwire client.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Endpoint** - Base URL normalization and path resolution
//! - **ConnectionManager** - One shared socket, reconnects, stale-event guard
//! - **TrackerRegistry** - One live tracker per id, event routing
//! - **StoreTracker** - Tracker that feeds an application store
//! - **Lifecycle** - Connect/disconnect listeners
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  ManagerEvent  ┌─────────────────────┐
//! │   Socket    │───────────────▶│  ConnectionManager  │◀──── RetryScheduler
//! └─────────────┘                └─────────────────────┘
//!                                   │               │
//!                                   ▼               ▼
//!                         ┌─────────────────┐ ┌───────────┐
//!                         │ TrackerRegistry │ │ Lifecycle │
//!                         └─────────────────┘ └───────────┘
//!                                   │
//!                                   ▼
//!                         ┌─────────────────┐
//!                         │     Tracker     │
//!                         └─────────────────┘
//! ```
//!
//! The transport is pluggable through [`Connector`]; `trackwire-transport`
//! provides the WebSocket implementation.

pub mod endpoint;
pub mod event;
pub mod lifecycle;
pub mod manager;
pub mod registry;
pub mod socket;
pub mod store;
pub mod timer;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use endpoint::{Endpoint, EndpointError};
pub use event::{Epoch, EventOutcome, EventReceiver, EventSender, ManagerEvent, SocketSignal, TimerToken};
pub use lifecycle::{Lifecycle, LifecycleEvent, LifecycleKind, ListenerId};
pub use manager::{
    close_policy, ClosePolicy, ConnectOutcome, ConnectionManager, ConnectionState, ManagerBuilder,
    ManagerConfig, ManagerStats, ReconnectError, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS,
    CLOSE_SESSION_EXPIRED, DEFAULT_RETRY_INTERVAL,
};
pub use registry::{RegistryError, RouteOutcome, TrackerRegistry};
pub use socket::{Connector, ReadyState, Socket};
pub use store::{StoreTracker, TrackerStore};
pub use timer::{RetryScheduler, TokioScheduler};
pub use tracker::{Outbox, Tracker, TrackerContext};
