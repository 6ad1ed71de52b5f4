//! WebSocket read pump — feeds inbound frames to the handler registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use pulsedesk_protocol::Frame;
use pulsedesk_protocol::constants::{TYPE_PING, TYPE_PONG, WS_MAX_MESSAGE_SIZE};

use crate::registry::HandlerRegistry;
use crate::ws_client::{CloseReason, DisconnectCallback};

/// Reads messages from the WebSocket and dispatches them.
///
/// Any inbound traffic resets the heartbeat miss counter. On exit the
/// sibling pumps are cancelled and the disconnect callback fires with the
/// observed close reason.
pub(crate) async fn read_pump<S>(
    mut read: S,
    registry: Arc<HandlerRegistry>,
    missed: Arc<AtomicU32>,
    on_disconnect: DisconnectCallback,
    write_tx: mpsc::Sender<tungstenite::Message>,
    forward_control: bool,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let mut close_code: Option<u16> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        // Any inbound traffic counts as liveness.
                        missed.store(0, Ordering::Relaxed);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text(&text, &registry, &write_tx, forward_control).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(frame) => {
                                close_code = frame.as_ref().map(|f| u16::from(f.code));
                                debug!(?close_code, "received close frame");
                                break;
                            }
                            _ => {} // Binary — not part of this protocol
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // The heartbeat timer must not outlive the connection.
    cancel.cancel();

    if let Some(cb) = on_disconnect.lock().await.as_ref() {
        cb(CloseReason { code: close_code });
    }
}

/// Handles one text message: answers application-level pings, then hands
/// the frame to the registry.
async fn handle_text(
    text: &str,
    registry: &Arc<HandlerRegistry>,
    write_tx: &mpsc::Sender<tungstenite::Message>,
    forward_control: bool,
) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }

    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("failed to parse frame: {e}");
            return;
        }
    };

    if frame.frame_type == TYPE_PING
        && let Ok(pong) = serde_json::to_string(&Frame::control(TYPE_PONG))
    {
        let _ = write_tx.send(tungstenite::Message::Text(pong.into())).await;
    }

    registry.dispatch_frame(&frame, forward_control);
}
