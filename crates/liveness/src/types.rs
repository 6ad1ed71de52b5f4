//! Public types for the liveness probe.

use std::time::Duration;

use pulsedesk_protocol::{channels, constants};

/// Combined backend reachability, as seen by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Online,
    Offline,
    /// No check has completed yet.
    Unknown,
}

/// Configuration for one probe instance.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Full URL of the HTTP readiness endpoint.
    pub http_url: String,
    /// Full URL of the dedicated health WebSocket; `None` disables the
    /// socket check.
    pub socket_url: Option<String>,
    /// Spacing between checks (both signals).
    pub interval: Duration,
    /// Upper bound on a single HTTP check.
    pub http_timeout: Duration,
    /// Consecutive failures before the backend is declared lost.
    pub failure_threshold: u32,
}

impl ProbeConfig {
    /// Builds the standard configuration from the backend base URLs.
    pub fn new(http_base: &str, ws_base: Option<&str>) -> Self {
        Self {
            http_url: channels::channel_url(http_base, &channels::readiness()),
            socket_url: ws_base.map(|base| channels::channel_url(base, &channels::health())),
            interval: constants::LIVENESS_INTERVAL,
            http_timeout: constants::LIVENESS_HTTP_TIMEOUT,
            failure_threshold: constants::LIVENESS_FAILURE_THRESHOLD,
        }
    }
}
