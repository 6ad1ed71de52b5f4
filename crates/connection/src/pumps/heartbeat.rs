//! Heartbeat pump — detects silent connection death.
//!
//! Networks that drop idle connections without a close frame leave the
//! transport looking healthy; the miss counter catches that faster than
//! any transport-level event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pulsedesk_protocol::Frame;
use pulsedesk_protocol::constants::TYPE_PING;

use crate::types::HeartbeatConfig;

/// Sends a ping frame every interval and counts unanswered pings.
///
/// The read pump resets `missed` on any inbound traffic. Once `missed`
/// reaches the threshold at a tick, the shared token is cancelled, tearing
/// the connection down through the same path as an abnormal closure.
pub(crate) async fn heartbeat_pump(
    config: HeartbeatConfig,
    write_tx: mpsc::Sender<tungstenite::Message>,
    missed: Arc<AtomicU32>,
    cancel: CancellationToken,
) {
    let ping = match serde_json::to_string(&Frame::control(TYPE_PING)) {
        Ok(json) => json,
        Err(_) => return,
    };

    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if missed.load(Ordering::Relaxed) >= config.miss_threshold {
                    warn!(
                        misses = config.miss_threshold,
                        "heartbeat timed out, declaring connection dead"
                    );
                    cancel.cancel();
                    break;
                }
                if write_tx
                    .send(tungstenite::Message::Text(ping.clone().into()))
                    .await
                    .is_err()
                {
                    break;
                }
                missed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(2),
            miss_threshold: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn declares_dead_after_threshold_misses() {
        let (write_tx, mut write_rx) = mpsc::channel(64);
        let missed = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(heartbeat_pump(
            config(),
            write_tx,
            missed,
            cancel.clone(),
        ));

        // Nothing answers: interval 2s, threshold 5 — dead at the 10s tick.
        handle.await.unwrap();
        assert!(cancel.is_cancelled());

        // Exactly five pings were sent before the declaration.
        let mut pings = 0;
        while let Ok(msg) = write_rx.try_recv() {
            let text = match msg {
                tungstenite::Message::Text(t) => t,
                other => panic!("unexpected message {other:?}"),
            };
            let frame: Frame = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(frame.frame_type, "ping");
            pings += 1;
        }
        assert_eq!(pings, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_counter_keeps_connection_alive() {
        let (write_tx, mut write_rx) = mpsc::channel(64);
        let missed = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(heartbeat_pump(
            config(),
            write_tx,
            missed.clone(),
            cancel.clone(),
        ));

        // Simulate the read pump answering every ping.
        for _ in 0..20 {
            tokio::time::advance(Duration::from_secs(2)).await;
            tokio::task::yield_now().await;
            missed.store(0, Ordering::Relaxed);
            while write_rx.try_recv().is_ok() {}
        }
        assert!(!cancel.is_cancelled());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (write_tx, _write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(heartbeat_pump(
            config(),
            write_tx,
            Arc::new(AtomicU32::new(0)),
            c,
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }
}
