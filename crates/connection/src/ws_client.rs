//! WebSocket transport for one connection.
//!
//! Splits the socket into read/write/heartbeat pumps tied to a single
//! cancellation token. A transport is exclusively owned by its manager;
//! the manager drops the old handle before opening a replacement.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use pulsedesk_protocol::Frame;
use pulsedesk_protocol::constants::{CLOSE_NORMAL, CLOSE_SESSION_INVALID, WS_MAX_MESSAGE_SIZE};

use crate::registry::HandlerRegistry;
use crate::types::HeartbeatConfig;

/// Errors from the transport layer. Never thrown at callers directly; the
/// manager converts them into state/event notifications.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

/// Why a transport died, as observed by the read pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    /// Close code from the peer's close frame, if one arrived.
    pub code: Option<u16>,
}

impl CloseReason {
    pub fn is_normal(&self) -> bool {
        self.code == Some(CLOSE_NORMAL)
    }

    pub fn is_session_invalid(&self) -> bool {
        self.code == Some(CLOSE_SESSION_INVALID)
    }
}

/// Callback invoked once when the transport dies, with the observed reason.
pub(crate) type DisconnectCallback =
    Arc<Mutex<Option<Box<dyn Fn(CloseReason) + Send + Sync>>>>;

/// One live WebSocket connection.
pub struct WsTransport {
    write_tx: mpsc::Sender<tungstenite::Message>,
    on_disconnect: DisconnectCallback,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _heartbeat_handle: Option<tokio::task::JoinHandle<()>>,
}

impl WsTransport {
    /// Opens the socket and starts the pumps. Inbound frames go straight to
    /// the shared registry.
    pub(crate) async fn connect(
        url: &str,
        registry: Arc<HandlerRegistry>,
        heartbeat: Option<HeartbeatConfig>,
        forward_control: bool,
    ) -> Result<Self, TransportError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let on_disconnect: DisconnectCallback = Arc::new(Mutex::new(None));
        let missed = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let registry = registry.clone();
            let missed = missed.clone();
            let on_disconnect = on_disconnect.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read,
                registry,
                missed,
                on_disconnect,
                write_tx,
                forward_control,
                cancel,
            ))
        };

        let heartbeat_handle = heartbeat.map(|config| {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::heartbeat::heartbeat_pump(
                config, write_tx, missed, cancel,
            ))
        });

        Ok(Self {
            write_tx,
            on_disconnect,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _heartbeat_handle: heartbeat_handle,
        })
    }

    /// Sets the callback fired when the transport dies.
    pub(crate) async fn set_disconnect_callback(
        &self,
        cb: Box<dyn Fn(CloseReason) + Send + Sync>,
    ) {
        *self.on_disconnect.lock().await = Some(cb);
    }

    /// Serializes and sends a frame.
    pub(crate) async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let json = serde_json::to_string(frame)?;
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Gracefully closes with the normal close code.
    pub(crate) async fn close(&self) {
        let close = tungstenite::protocol::CloseFrame {
            code: tungstenite::protocol::frame::coding::CloseCode::Normal,
            reason: "".into(),
        };
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(Some(close)))
            .await;
        self.cancel.cancel();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        if let Some(handle) = &self._heartbeat_handle {
            handle.abort();
        }
    }
}
