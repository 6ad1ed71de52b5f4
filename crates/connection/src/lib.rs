//! Connection manager for the Pulsedesk real-time channels.
//!
//! Owns one WebSocket connection per manager instance, reconnects
//! automatically with exponential backoff, keeps idle connections alive
//! with heartbeats, and dispatches inbound frames to registered handlers.
//! The session layer adds transparent recreation of server-invalidated
//! sessions on top.

pub mod backoff;
pub mod manager;
pub(crate) mod pumps;
pub(crate) mod reconnection;
pub mod registry;
pub mod session;
pub mod types;
pub(crate) mod ws_client;

pub use backoff::BackoffPolicy;
pub use manager::ConnectionManager;
pub use registry::{Handler, HandlerRegistry, WILDCARD};
pub use session::{
    HttpSessionBackend, SessionBackend, SessionChannel, SessionError, SessionEvent, SessionStatus,
};
pub use types::{ConnectOptions, ConnectionEvent, ConnectionState, HeartbeatConfig};
pub use ws_client::TransportError;
