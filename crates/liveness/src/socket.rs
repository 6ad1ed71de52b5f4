//! Dedicated heartbeat socket.
//!
//! Always-on: carries no business traffic, just pings the health channel
//! and reports pong receipt. Unlike feature connections it never gives up —
//! it retries with a flat delay for as long as the probe runs.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pulsedesk_protocol::Frame;
use pulsedesk_protocol::constants::TYPE_PING;

use crate::probe::ProbeShared;

/// Maintains the health socket, reporting each ping round as a success or
/// failure into the shared tracker.
pub(crate) async fn socket_pump(
    url: String,
    interval: Duration,
    shared: Arc<ProbeShared>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                shared.report(true);
                run_heartbeat(stream, interval, &shared, &cancel).await;
            }
            Err(e) => {
                debug!(error = %e, "health socket connect failed");
                shared.report(false);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Ping/pong loop over an established health socket. Returns when the
/// socket dies or the probe stops.
async fn run_heartbeat(
    mut stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    interval: Duration,
    shared: &Arc<ProbeShared>,
    cancel: &CancellationToken,
) {
    let ping = match serde_json::to_string(&Frame::control(TYPE_PING)) {
        Ok(json) => json,
        Err(_) => return,
    };

    let mut ticker = tokio::time::interval(interval);
    let mut answered = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = stream.close(None).await;
                return;
            }

            _ = ticker.tick() => {
                if !answered {
                    shared.report(false);
                }
                answered = false;
                if stream.send(Message::Text(ping.clone().into())).await.is_err() {
                    shared.report(false);
                    return;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(_) | Message::Pong(_))) => {
                        answered = true;
                        shared.report(true);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = stream.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("health socket closed");
                        shared.report(false);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "health socket error");
                        shared.report(false);
                        return;
                    }
                }
            }
        }
    }
}
