//! Automatic reconnection with exponential backoff.
//!
//! Contains the shared [`ReconnectContext`], cancellation helpers, the
//! transport disconnect callback, and the reconnect loop itself.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::HandlerRegistry;
use crate::types::{ConnectOptions, ConnectionEvent, ConnectionState};
use crate::ws_client::{CloseReason, WsTransport};

/// Shared state passed to free functions for callback setup and the
/// reconnect loop. Avoids threading eight separate Arc parameters.
#[derive(Clone)]
pub(crate) struct ReconnectContext {
    pub(crate) options: ConnectOptions,
    pub(crate) endpoint: Arc<Mutex<Option<String>>>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) transport: Arc<Mutex<Option<WsTransport>>>,
    pub(crate) state_tx: Arc<watch::Sender<ConnectionState>>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    pub(crate) reconnect_cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    pub(crate) manual_disconnect: Arc<AtomicBool>,
}

impl ReconnectContext {
    /// Updates the published state and emits a `StateChanged` event.
    pub(crate) fn set_state(&self, endpoint: &str, state: ConnectionState) {
        self.state_tx.send_replace(state.clone());
        let _ = self.events_tx.try_send(ConnectionEvent::StateChanged {
            endpoint: endpoint.to_string(),
            state,
        });
    }
}

/// Cancels any pending reconnect loop.
pub(crate) fn cancel_pending_reconnect(
    reconnect_cancel: &std::sync::Mutex<Option<CancellationToken>>,
) {
    if let Ok(mut guard) = reconnect_cancel.lock()
        && let Some(token) = guard.take()
    {
        token.cancel();
    }
}

/// Replaces the pending reconnect token, cancelling its predecessor. At
/// most one reconnect loop may be alive per manager.
pub(crate) fn replace_reconnect(
    reconnect_cancel: &std::sync::Mutex<Option<CancellationToken>>,
    token: CancellationToken,
) {
    if let Ok(mut guard) = reconnect_cancel.lock() {
        if let Some(old) = guard.take() {
            old.cancel();
        }
        *guard = Some(token);
    }
}

/// Installs the disconnect callback that routes a dead transport into the
/// right recovery path.
pub(crate) async fn setup_transport_callbacks(
    transport: &WsTransport,
    endpoint: &str,
    ctx: ReconnectContext,
) {
    let endpoint = endpoint.to_string();
    transport
        .set_disconnect_callback(Box::new(move |reason: CloseReason| {
            let manual = ctx.manual_disconnect.load(Ordering::Relaxed);

            if manual || reason.is_normal() {
                // Caller-initiated or clean server closure — no recovery.
                ctx.set_state(&endpoint, ConnectionState::Disconnected);
                return;
            }

            if ctx.options.session_aware {
                // Hand the decision to the session layer before any
                // backoff runs.
                ctx.set_state(&endpoint, ConnectionState::Reconnecting { attempt: 0 });
                let event = if reason.is_session_invalid() {
                    ConnectionEvent::SessionInvalidated {
                        endpoint: endpoint.clone(),
                        code: reason.code.unwrap_or_default(),
                    }
                } else {
                    ConnectionEvent::ConnectionLost {
                        endpoint: endpoint.clone(),
                        code: reason.code,
                    }
                };
                if let Err(e) = ctx.events_tx.try_send(event) {
                    warn!("failed to surface connection loss: {e}");
                }
                return;
            }

            if !ctx.options.auto_reconnect {
                warn!(endpoint = %endpoint, "connection lost, reconnection disabled");
                ctx.set_state(&endpoint, ConnectionState::Failed);
                return;
            }

            ctx.set_state(&endpoint, ConnectionState::Reconnecting { attempt: 0 });
            let cancel = CancellationToken::new();
            replace_reconnect(&ctx.reconnect_cancel, cancel.clone());
            tokio::spawn(reconnect_loop(ctx.clone(), cancel));
        }))
        .await;
}

/// Reconnection loop with exponential backoff.
///
/// Returns a boxed future to break the recursive type cycle with
/// `setup_transport_callbacks` (which spawns this function from its
/// disconnect callback).
pub(crate) fn reconnect_loop(
    ctx: ReconnectContext,
    cancel: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let Some(endpoint) = ctx.endpoint.lock().await.clone() else {
            return;
        };

        // Drop the dead transport before opening a replacement; at most one
        // live handle may exist at any instant.
        drop(ctx.transport.lock().await.take());

        let mut attempt: u32 = 0;

        loop {
            // Reverify backend reachability before spending an attempt.
            if let Some(mut gate) = ctx.options.offline_gate.clone() {
                let mut announced = false;
                loop {
                    if *gate.borrow_and_update() {
                        break;
                    }
                    if !announced {
                        announced = true;
                        info!(endpoint = %endpoint, "backend offline, pausing reconnection");
                        let _ = ctx.events_tx.try_send(ConnectionEvent::Offline {
                            endpoint: endpoint.clone(),
                        });
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(endpoint = %endpoint, "reconnect cancelled");
                            return;
                        }
                        changed = gate.changed() => {
                            if changed.is_err() {
                                // Probe gone — stop gating.
                                break;
                            }
                        }
                    }
                }
            }

            attempt += 1;
            if ctx.options.backoff.exhausted(attempt) {
                warn!(
                    endpoint = %endpoint,
                    attempts = attempt - 1,
                    "reconnect attempts exhausted"
                );
                ctx.set_state(&endpoint, ConnectionState::Failed);
                break;
            }

            let delay = ctx.options.backoff.delay_for_attempt(attempt);
            let delay_secs = delay.as_secs_f64();

            ctx.set_state(&endpoint, ConnectionState::Reconnecting { attempt });
            let _ = ctx.events_tx.try_send(ConnectionEvent::Reconnecting {
                endpoint: endpoint.clone(),
                attempt,
                next_retry_secs: delay_secs,
            });

            info!(
                endpoint = %endpoint,
                attempt,
                delay_secs = format_args!("{delay_secs:.1}"),
                "reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(endpoint = %endpoint, "reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if cancel.is_cancelled() {
                return;
            }

            match WsTransport::connect(
                &endpoint,
                ctx.registry.clone(),
                ctx.options.heartbeat,
                ctx.options.forward_control_frames,
            )
            .await
            {
                Ok(transport) => {
                    // Callbacks on the new transport include this same
                    // reconnect path for future disconnects.
                    setup_transport_callbacks(&transport, &endpoint, ctx.clone()).await;
                    *ctx.transport.lock().await = Some(transport);
                    ctx.set_state(&endpoint, ConnectionState::Connected);
                    info!(endpoint = %endpoint, "reconnected");
                    break;
                }
                Err(e) => {
                    warn!(
                        endpoint = %endpoint,
                        attempt,
                        error = %e,
                        "reconnect attempt failed"
                    );
                }
            }

            if cancel.is_cancelled() {
                return;
            }
        }
    })
}
