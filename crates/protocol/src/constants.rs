//! Reserved frame types, close codes, and shared limits.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Reserved control frame types (consumed by the transport layer)
// ---------------------------------------------------------------------------

pub const TYPE_PING: &str = "ping";
pub const TYPE_PONG: &str = "pong";
pub const TYPE_HEARTBEAT: &str = "heartbeat";

// ---------------------------------------------------------------------------
// Business frame types used by the dashboard features
// ---------------------------------------------------------------------------

pub const TYPE_CONNECTION_ESTABLISHED: &str = "connection_established";
pub const TYPE_TASK_CREATED: &str = "task_created";
pub const TYPE_TASK_UPDATED: &str = "task_updated";
pub const TYPE_TASK_DELETED: &str = "task_deleted";
pub const TYPE_INITIAL_TASKS: &str = "initial_tasks";
pub const TYPE_PROJECT_CREATED: &str = "project_created";
pub const TYPE_SOURCE_UPDATE: &str = "source_update";
pub const TYPE_STREAM_CHUNK: &str = "stream_chunk";
pub const TYPE_STREAM_COMPLETE: &str = "stream_complete";

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// Caller-initiated normal closure. Never triggers reconnection.
pub const CLOSE_NORMAL: u16 = 1000;

/// The server no longer knows the session id this channel was opened with.
/// Session-aware channels recreate the session instead of reconnecting.
pub const CLOSE_SESSION_INVALID: u16 = 4004;

// ---------------------------------------------------------------------------
// Limits and timings
// ---------------------------------------------------------------------------

/// Maximum accepted message size (1 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default heartbeat interval for feature channels.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive unanswered heartbeats before a connection is declared dead.
pub const HEARTBEAT_MISS_THRESHOLD: u32 = 5;

/// Probe spacing for the backend liveness checks.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on a single liveness HTTP check.
pub const LIVENESS_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive failed liveness checks before the backend is declared lost.
pub const LIVENESS_FAILURE_THRESHOLD: u32 = 5;
