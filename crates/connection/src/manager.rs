//! Connection manager — the public face of one logical connection.
//!
//! Owns the transport, the handler registry, and the recovery machinery.
//! Transport errors are never thrown at callers: `send` degrades to a
//! boolean and `connect` reports failures through state/event
//! notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulsedesk_protocol::Frame;

use crate::reconnection::{
    ReconnectContext, cancel_pending_reconnect, reconnect_loop, replace_reconnect,
    setup_transport_callbacks,
};
use crate::registry::{Handler, HandlerRegistry};
use crate::types::{ConnectOptions, ConnectionEvent, ConnectionState};
use crate::ws_client::WsTransport;

/// Manager for one logical connection to one endpoint.
///
/// Construct one instance per feature channel; instances share nothing.
/// Multiple UI panels watching the same channel register handlers on the
/// same manager instead of opening duplicate transports.
pub struct ConnectionManager {
    options: ConnectOptions,
    endpoint: Arc<Mutex<Option<String>>>,
    registry: Arc<HandlerRegistry>,
    transport: Arc<Mutex<Option<WsTransport>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    reconnect_cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    manual_disconnect: Arc<AtomicBool>,
}

impl ConnectionManager {
    /// Creates a new manager. Nothing connects until [`connect`](Self::connect).
    pub fn new(options: ConnectOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        Self {
            options,
            endpoint: Arc::new(Mutex::new(None)),
            registry: Arc::new(HandlerRegistry::new()),
            transport: Arc::new(Mutex::new(None)),
            state_tx: Arc::new(state_tx),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            reconnect_cancel: Arc::new(std::sync::Mutex::new(None)),
            manual_disconnect: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribes to state changes. Any number of observers may watch.
    pub fn state_rx(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Registers a handler for a frame type (or [`crate::WILDCARD`]).
    /// Takes effect for the next dispatched frame.
    pub fn on(&self, frame_type: &str, key: &str, handler: impl Fn(&Frame) + Send + Sync + 'static) {
        self.registry.register(frame_type, key, Arc::new(handler));
    }

    /// Registers an already-shared handler.
    pub fn on_handler(&self, frame_type: &str, key: &str, handler: Handler) {
        self.registry.register(frame_type, key, handler);
    }

    /// Removes a handler. Returns `true` if it was registered.
    pub fn off(&self, frame_type: &str, key: &str) -> bool {
        self.registry.unregister(frame_type, key)
    }

    /// Connects to an endpoint.
    ///
    /// Idempotent per endpoint: connecting to the endpoint this manager is
    /// already connected to is a no-op. Connecting to a different endpoint
    /// tears the previous connection down cleanly (transport closed, timers
    /// cancelled, handlers cleared) before opening the new one. Open
    /// failures are reported through state/event notifications, not
    /// returned.
    pub async fn connect(&self, endpoint: &str) {
        let switching = {
            let current = self.endpoint.lock().await;
            if current.as_deref() == Some(endpoint) && self.is_connected() {
                debug!(endpoint, "already connected");
                return;
            }
            current.is_some() && current.as_deref() != Some(endpoint)
        };

        cancel_pending_reconnect(&self.reconnect_cancel);
        self.manual_disconnect.store(false, Ordering::Relaxed);
        if switching {
            self.registry.clear();
        }
        self.teardown_transport().await;
        *self.endpoint.lock().await = Some(endpoint.to_string());
        self.open().await;
    }

    /// Manual retry after `Failed`. Resets the attempt count and re-enters
    /// `Connecting` against the current endpoint.
    pub async fn reconnect(&self) {
        let Some(endpoint) = self.endpoint.lock().await.clone() else {
            debug!("reconnect requested before any connect");
            return;
        };
        self.rebind(&endpoint).await;
    }

    /// Re-opens against a new endpoint **keeping** registered handlers.
    /// Used when a server-side session is recreated under a new id.
    pub async fn rebind(&self, endpoint: &str) {
        cancel_pending_reconnect(&self.reconnect_cancel);
        self.manual_disconnect.store(false, Ordering::Relaxed);
        self.teardown_transport().await;
        *self.endpoint.lock().await = Some(endpoint.to_string());
        self.open().await;
    }

    /// Serializes and sends a frame. Returns `false` (never an error) when
    /// not connected, so callers can choose to queue or drop.
    pub async fn send<T: Serialize>(&self, frame_type: &str, data: Option<&T>) -> bool {
        if !self.is_connected() {
            return false;
        }
        let frame = match Frame::new(frame_type, data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(frame_type, "failed to serialize frame: {e}");
                return false;
            }
        };
        let guard = self.transport.lock().await;
        match guard.as_ref() {
            Some(transport) => transport.send_frame(&frame).await.is_ok(),
            None => false,
        }
    }

    /// Disconnects with a normal closure. Terminal for this connection;
    /// handlers are discarded. Idempotent — a second call has no further
    /// side effect.
    pub async fn disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::Relaxed);
        cancel_pending_reconnect(&self.reconnect_cancel);
        let closed = self.teardown_transport().await;
        self.registry.clear();

        if closed || self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            debug!("disconnected");
        }
    }

    /// Spawns the generic backoff loop against the current endpoint. Used
    /// by the session layer when invalidation could not be confirmed.
    pub async fn resume_reconnect(&self) {
        let cancel = CancellationToken::new();
        replace_reconnect(&self.reconnect_cancel, cancel.clone());
        tokio::spawn(reconnect_loop(self.context(), cancel));
    }

    /// Marks the connection failed. Session layer only.
    pub(crate) fn fail(&self) {
        self.set_state(ConnectionState::Failed);
    }

    /// Closes and drops the current transport, if any.
    async fn teardown_transport(&self) -> bool {
        match self.transport.lock().await.take() {
            Some(transport) => {
                transport.close().await;
                true
            }
            None => false,
        }
    }

    /// Opens a transport against the current endpoint and installs the
    /// recovery callbacks.
    async fn open(&self) {
        let Some(endpoint) = self.endpoint.lock().await.clone() else {
            return;
        };
        self.set_state(ConnectionState::Connecting);

        match WsTransport::connect(
            &endpoint,
            self.registry.clone(),
            self.options.heartbeat,
            self.options.forward_control_frames,
        )
        .await
        {
            Ok(transport) => {
                setup_transport_callbacks(&transport, &endpoint, self.context()).await;
                *self.transport.lock().await = Some(transport);
                self.set_state(ConnectionState::Connected);
                info!(endpoint = %endpoint, "connected");
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "connection failed");
                let _ = self.events_tx.try_send(ConnectionEvent::TransportError {
                    endpoint: endpoint.clone(),
                    message: e.to_string(),
                });
                if self.options.auto_reconnect {
                    self.set_state(ConnectionState::Reconnecting { attempt: 0 });
                    let cancel = CancellationToken::new();
                    replace_reconnect(&self.reconnect_cancel, cancel.clone());
                    tokio::spawn(reconnect_loop(self.context(), cancel));
                } else {
                    self.set_state(ConnectionState::Failed);
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        // The endpoint may be unset before the first connect.
        let endpoint = self
            .endpoint
            .try_lock()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or_default();
        self.state_tx.send_replace(state.clone());
        let _ = self
            .events_tx
            .try_send(ConnectionEvent::StateChanged { endpoint, state });
    }

    /// Builds the shared context handed to the reconnection machinery.
    pub(crate) fn context(&self) -> ReconnectContext {
        ReconnectContext {
            options: self.options.clone(),
            endpoint: self.endpoint.clone(),
            registry: self.registry.clone(),
            transport: self.transport.clone(),
            state_tx: self.state_tx.clone(),
            events_tx: self.events_tx.clone(),
            reconnect_cancel: self.reconnect_cancel.clone(),
            manual_disconnect: self.manual_disconnect.clone(),
        }
    }
}
