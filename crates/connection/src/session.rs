//! Session recovery for channels whose server can unilaterally invalidate
//! the session id (chat, per-project task streams).
//!
//! Layered over [`ConnectionManager`]: invalidation signals are intercepted
//! before the generic backoff path runs, a replacement session is created,
//! and the handler registry moves to the new session wholesale — callers
//! never re-register.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use pulsedesk_protocol::Frame;
use pulsedesk_protocol::channels;

use crate::manager::ConnectionManager;
use crate::types::{ConnectOptions, ConnectionEvent};

/// Errors from the session API.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("session API returned status {0}")]
    Status(u16),
}

/// Outcome of a session status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The server still knows the session; reconnect instead of recreating.
    Active,
    /// The server rejected or forgot the session id.
    Invalid,
}

/// Server-side session lifecycle calls.
pub trait SessionBackend: Send + Sync + 'static {
    /// Creates a new session, returning its id.
    fn create_session(&self) -> impl Future<Output = Result<String, SessionError>> + Send;

    /// Checks whether the server still knows the session.
    fn session_status(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<SessionStatus, SessionError>> + Send;
}

#[derive(serde::Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Session calls against the dashboard HTTP API.
pub struct HttpSessionBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl SessionBackend for HttpSessionBackend {
    async fn create_session(&self) -> Result<String, SessionError> {
        let url = channels::channel_url(&self.base_url, &channels::chat_sessions());
        let resp = self.client.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(SessionError::Status(resp.status().as_u16()));
        }
        let body: CreateSessionResponse = resp.json().await?;
        Ok(body.session_id)
    }

    async fn session_status(&self, id: &str) -> Result<SessionStatus, SessionError> {
        let url = channels::channel_url(&self.base_url, &channels::chat_session_status(id));
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status.as_u16() == 403 || status.as_u16() == 404 {
            return Ok(SessionStatus::Invalid);
        }
        if status.is_success() {
            return Ok(SessionStatus::Active);
        }
        Err(SessionError::Status(status.as_u16()))
    }
}

/// Events emitted by a session channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The server-side session was recreated under a new id. UI state
    /// referencing the old id should be updated.
    Replaced { old: String, new: String },
    /// Everything else, forwarded from the underlying connection.
    Connection(ConnectionEvent),
}

/// A connection whose endpoint is parameterized by a server-assigned
/// session id, recreated transparently when the server invalidates it.
pub struct SessionChannel<B: SessionBackend> {
    backend: Arc<B>,
    manager: Arc<ConnectionManager>,
    endpoint_for: Arc<dyn Fn(&str) -> String + Send + Sync>,
    session_id: Arc<Mutex<Option<String>>>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    supervisor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<B: SessionBackend> SessionChannel<B> {
    /// `endpoint_for` maps a session id to the channel URL.
    pub fn new(
        backend: B,
        mut options: ConnectOptions,
        endpoint_for: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        options.session_aware = true;
        let (events_tx, events_rx) = mpsc::channel(64);

        Self {
            backend: Arc::new(backend),
            manager: Arc::new(ConnectionManager::new(options)),
            endpoint_for: Arc::new(endpoint_for),
            session_id: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            supervisor: Mutex::new(None),
        }
    }

    /// The underlying manager, for state watching.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Current session id, if a session is open.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Registers a handler; it survives reconnects and session
    /// substitution without re-registration.
    pub fn on(&self, frame_type: &str, key: &str, handler: impl Fn(&Frame) + Send + Sync + 'static) {
        self.manager.on(frame_type, key, handler);
    }

    pub fn off(&self, frame_type: &str, key: &str) -> bool {
        self.manager.off(frame_type, key)
    }

    pub async fn send<T: serde::Serialize>(&self, frame_type: &str, data: Option<&T>) -> bool {
        self.manager.send(frame_type, data).await
    }

    /// Creates a session and opens the channel against it.
    pub async fn open(&self) -> Result<(), SessionError> {
        let id = self.backend.create_session().await?;
        *self.session_id.lock().await = Some(id.clone());

        let endpoint = (self.endpoint_for)(&id);
        self.manager.connect(&endpoint).await;

        let Some(events) = self.manager.take_events().await else {
            return Ok(());
        };
        let task = tokio::spawn(supervise(
            self.backend.clone(),
            self.manager.clone(),
            self.endpoint_for.clone(),
            self.session_id.clone(),
            self.events_tx.clone(),
            events,
        ));
        *self.supervisor.lock().await = Some(task);
        Ok(())
    }

    /// Ends the feature interaction: closes the connection and destroys the
    /// session state.
    pub async fn close(&self) {
        if let Some(task) = self.supervisor.lock().await.take() {
            task.abort();
        }
        self.manager.disconnect().await;
        *self.session_id.lock().await = None;
    }
}

/// Watches the manager's events and drives recovery on invalidation.
async fn supervise<B: SessionBackend>(
    backend: Arc<B>,
    manager: Arc<ConnectionManager>,
    endpoint_for: Arc<dyn Fn(&str) -> String + Send + Sync>,
    session_id: Arc<Mutex<Option<String>>>,
    events_tx: mpsc::Sender<SessionEvent>,
    mut events: mpsc::Receiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        let _ = events_tx
            .send(SessionEvent::Connection(event.clone()))
            .await;

        match event {
            ConnectionEvent::SessionInvalidated { code, .. } => {
                info!(code, "session invalidated by server");
                recover(&backend, &manager, &endpoint_for, &session_id, &events_tx).await;
            }
            ConnectionEvent::ConnectionLost { code, .. } => {
                // The close code alone is inconclusive — ask the status
                // endpoint whether the session survived.
                let current = session_id.lock().await.clone();
                let invalid = match &current {
                    Some(id) => {
                        matches!(backend.session_status(id).await, Ok(SessionStatus::Invalid))
                    }
                    None => false,
                };
                if invalid {
                    info!(?code, "session confirmed gone, recreating");
                    recover(&backend, &manager, &endpoint_for, &session_id, &events_tx).await;
                } else {
                    // Session intact — a transient network blip. Generic
                    // backoff, no session churn.
                    manager.resume_reconnect().await;
                }
            }
            _ => {}
        }
    }
}

/// Creates a replacement session and rebinds the connection to it,
/// transferring the handler registry untouched.
async fn recover<B: SessionBackend>(
    backend: &Arc<B>,
    manager: &Arc<ConnectionManager>,
    endpoint_for: &Arc<dyn Fn(&str) -> String + Send + Sync>,
    session_id: &Arc<Mutex<Option<String>>>,
    events_tx: &mpsc::Sender<SessionEvent>,
) {
    let old = session_id.lock().await.clone().unwrap_or_default();
    let backoff = manager.options().backoff.clone();

    // Recreation failures are bounded by the same backoff policy as
    // reconnects.
    let mut attempt: u32 = 0;
    let new_id = loop {
        match backend.create_session().await {
            Ok(id) => break id,
            Err(e) => {
                attempt += 1;
                if backoff.exhausted(attempt) {
                    warn!(error = %e, "session recreation attempts exhausted");
                    manager.fail();
                    return;
                }
                warn!(error = %e, attempt, "session recreation failed, retrying");
                tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
            }
        }
    };

    *session_id.lock().await = Some(new_id.clone());
    info!(old = %old, new = %new_id, "session recreated");

    manager.rebind(&(endpoint_for)(&new_id)).await;

    let _ = events_tx
        .send(SessionEvent::Replaced {
            old,
            new: new_id,
        })
        .await;
}
