//! Endpoint paths for the feature channels.
//!
//! Paths are logical; [`channel_url`] joins them onto the backend base URL.

/// Knowledge-base update stream.
pub fn knowledge_updates() -> String {
    "/ws/knowledge".into()
}

/// Project list live-sync channel.
pub fn projects() -> String {
    "/ws/projects".into()
}

/// Per-project task channel, parameterized by the sync session id.
pub fn project_tasks(project_id: &str, session_id: &str) -> String {
    format!("/ws/projects/{project_id}/tasks?session={session_id}")
}

/// Generates a client-side sync session id for channels that need one
/// before the server has assigned anything.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Per-session chat channel.
pub fn chat_session(session_id: &str) -> String {
    format!("/ws/chat/{session_id}")
}

/// Dedicated health channel for the liveness probe socket.
pub fn health() -> String {
    "/ws/health".into()
}

/// HTTP readiness endpoint polled by the liveness probe.
pub fn readiness() -> String {
    "/api/health/ready".into()
}

/// HTTP endpoint creating a new chat session.
pub fn chat_sessions() -> String {
    "/api/chat/sessions".into()
}

/// HTTP endpoint reading one chat session (the invalidation status probe).
pub fn chat_session_status(session_id: &str) -> String {
    format!("/api/chat/sessions/{session_id}")
}

/// Joins a channel path onto a base URL, normalizing the slash.
pub fn channel_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
