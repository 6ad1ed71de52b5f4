//! Public types for the connection manager.

use std::time::Duration;

use tokio::sync::watch;

use pulsedesk_protocol::constants;

use crate::backoff::BackoffPolicy;

/// Lifecycle state of one logical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport open. Terminal after an explicit `disconnect()`.
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open, frames flowing.
    Connected,
    /// Connection lost, automatic recovery in progress. `attempt` is the
    /// retry currently scheduled (0 while the recovery decision is pending).
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted, or reconnection disabled. Terminal
    /// until a manual [`reconnect`](crate::ConnectionManager::reconnect).
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the state machine stops here without caller intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// Events emitted by the connection manager.
///
/// State changes are also published on the manager's `watch` channel; the
/// event stream adds the context a UI needs (attempt counts, close codes).
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged {
        endpoint: String,
        state: ConnectionState,
    },
    /// A reconnect attempt has been scheduled.
    Reconnecting {
        endpoint: String,
        attempt: u32,
        next_retry_secs: f64,
    },
    /// Reconnection is paused: the liveness gate reports the backend
    /// unreachable. Retries resume when the gate reopens.
    Offline { endpoint: String },
    /// Session-aware channels only: the connection closed abnormally and
    /// the session layer must decide between recreation and plain backoff.
    ConnectionLost {
        endpoint: String,
        code: Option<u16>,
    },
    /// Session-aware channels only: the server declared the session id
    /// invalid via its distinguished close code.
    SessionInvalidated { endpoint: String, code: u16 },
    /// A transport error was swallowed on the connect/send path and is
    /// surfaced here instead of being thrown at the caller.
    TransportError { endpoint: String, message: String },
}

/// Heartbeat configuration for an established connection.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Spacing between ping frames.
    pub interval: Duration,
    /// Consecutive unanswered pings before the connection is declared dead.
    pub miss_threshold: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: constants::HEARTBEAT_INTERVAL,
            miss_threshold: constants::HEARTBEAT_MISS_THRESHOLD,
        }
    }
}

/// Per-manager connection options.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Recover abnormal closures automatically.
    pub auto_reconnect: bool,
    /// Retry schedule and attempt ceiling.
    pub backoff: BackoffPolicy,
    /// Heartbeat monitoring; `None` disables it (the dedicated liveness
    /// socket runs its own).
    pub heartbeat: Option<HeartbeatConfig>,
    /// Forward reserved control frames (`ping`/`pong`/`heartbeat`) to
    /// registered handlers instead of consuming them internally.
    pub forward_control_frames: bool,
    /// The server may unilaterally invalidate this channel's session id.
    /// Abnormal closures are then surfaced as [`ConnectionEvent::ConnectionLost`]
    /// / [`ConnectionEvent::SessionInvalidated`] for the session layer
    /// instead of entering generic backoff directly.
    pub session_aware: bool,
    /// Backend reachability gate from the liveness probe. While it reads
    /// `false`, scheduled retries pause without consuming attempts.
    pub offline_gate: Option<watch::Receiver<bool>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            backoff: BackoffPolicy::default(),
            heartbeat: Some(HeartbeatConfig::default()),
            forward_control_frames: false,
            session_aware: false,
            offline_gate: None,
        }
    }
}
