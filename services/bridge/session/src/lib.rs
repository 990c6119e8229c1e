//! Persistent control-API session management for castbridge.
//!
//! This crate provides the connection manager at the heart of the
//! bridge: it keeps one logical JSON-RPC session alive over an
//! unreliable duplex transport, multiplexes concurrent request/response
//! pairs, routes server-push events to subscriber callbacks, and
//! recovers from disconnection with linearly growing backoff.
//!
//! ## Features
//!
//! - **Transports**: WebSocket client binding plus an in-process
//!   channel transport for tests and embedders
//! - **Request Correlation**: monotonically increasing ids, one
//!   completion per in-flight request
//! - **Event Subscriptions**: token-keyed callback registry,
//!   re-negotiated automatically after every reconnect
//! - **Auto-reconnect**: linear backoff, attempt counter reset on
//!   `Ready`, unbounded by design
//!
//! ## Example
//!
//! ```rust,no_run
//! use bridge_session::{SessionConfig, SessionManager};
//! use bridge_session::transport::ws::WsTransport;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::new("studio", "127.0.0.1", 59650, "api-token");
//! let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
//!
//! let manager = SessionManager::new(config, WsTransport, notify_tx);
//! let handle = manager.handle();
//! tokio::spawn(manager.run());
//!
//! handle.start();
//! while let Some(notification) = notify_rx.recv().await {
//!     println!("{}: {:?}", notification.session, notification.lifecycle);
//! }
//!
//! let scenes = handle.call("ScenesService", "getScenes", vec![]).await?;
//! println!("scenes: {}", scenes);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod manager;
pub mod pending;
pub mod subscription;
pub mod transport;

// Re-export main types
pub use error::RpcError;
pub use manager::{
    reconnect_delay, ConnectionState, Lifecycle, Notification, SessionConfig, SessionHandle,
    SessionManager, DEFAULT_BASE_DELAY,
};
pub use pending::{Completion, PendingEntry, PendingTable};
pub use subscription::{EventCallback, SubscriptionRegistry, SubscriptionSpec};
pub use transport::{Connection, Endpoint, Transport, TransportError};
