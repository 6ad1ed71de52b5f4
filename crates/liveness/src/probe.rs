//! Probe composition: two independent signals, one combined state.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::http;
use crate::socket::socket_pump;
use crate::tracker::{LivenessTransition, ProbeTracker};
use crate::types::{LivenessState, ProbeConfig};

type Listener = Box<dyn Fn() + Send + Sync>;

/// State shared between the check tasks and the probe handle.
pub(crate) struct ProbeShared {
    tracker: Mutex<ProbeTracker>,
    state_tx: watch::Sender<LivenessState>,
    gate_tx: watch::Sender<bool>,
    on_disconnected: Mutex<Vec<Listener>>,
    on_reconnected: Mutex<Vec<Listener>>,
}

impl ProbeShared {
    /// Feeds one check result into the tracker and fires transitions.
    pub(crate) fn report(&self, ok: bool) {
        let transition = {
            let mut tracker = self.tracker.lock().unwrap();
            let transition = if ok {
                tracker.record_success()
            } else {
                tracker.record_failure()
            };
            self.state_tx.send_replace(tracker.state());
            transition
        };

        match transition {
            Some(LivenessTransition::Disconnected) => {
                warn!("backend unreachable");
                self.gate_tx.send_replace(false);
                for listener in self.on_disconnected.lock().unwrap().iter() {
                    listener();
                }
            }
            Some(LivenessTransition::Reconnected) => {
                info!("backend reachable again");
                self.gate_tx.send_replace(true);
                for listener in self.on_reconnected.lock().unwrap().iter() {
                    listener();
                }
            }
            None => {}
        }
    }
}

/// Backend reachability probe.
///
/// Runs an HTTP readiness poll and a dedicated heartbeat socket in
/// parallel; either succeeding counts as liveness. Decoupled from every
/// feature connection, and owns no UI state — the shell subscribes through
/// [`on_disconnected`](Self::on_disconnected) /
/// [`on_reconnected`](Self::on_reconnected).
pub struct LivenessProbe {
    config: ProbeConfig,
    shared: Arc<ProbeShared>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl LivenessProbe {
    pub fn new(config: ProbeConfig) -> Self {
        let (state_tx, _) = watch::channel(LivenessState::Unknown);
        // The gate starts open: retries are only paused once the backend is
        // confirmed lost.
        let (gate_tx, _) = watch::channel(true);

        let shared = Arc::new(ProbeShared {
            tracker: Mutex::new(ProbeTracker::new(config.failure_threshold)),
            state_tx,
            gate_tx,
            on_disconnected: Mutex::new(Vec::new()),
            on_reconnected: Mutex::new(Vec::new()),
        });

        Self {
            config,
            shared,
            cancel: Mutex::new(None),
        }
    }

    /// Registers a listener fired exactly once per loss.
    pub fn on_disconnected(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared
            .on_disconnected
            .lock()
            .unwrap()
            .push(Box::new(listener));
    }

    /// Registers a listener fired exactly once per recovery.
    pub fn on_reconnected(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared
            .on_reconnected
            .lock()
            .unwrap()
            .push(Box::new(listener));
    }

    /// Current combined state.
    pub fn state(&self) -> LivenessState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribes to combined state changes.
    pub fn state_rx(&self) -> watch::Receiver<LivenessState> {
        self.shared.state_tx.subscribe()
    }

    /// Reachability gate for connection managers: reads `false` while the
    /// backend is declared lost. Wire into
    /// `ConnectOptions::offline_gate`.
    pub fn gate(&self) -> watch::Receiver<bool> {
        self.shared.gate_tx.subscribe()
    }

    /// Starts the check tasks. Restart-safe: a previous run is stopped
    /// first.
    pub fn start(&self) {
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.cancel.lock() {
            if let Some(old) = guard.take() {
                old.cancel();
            }
            *guard = Some(token.clone());
        }

        let client = reqwest::Client::new();
        tokio::spawn(http_pump(
            client,
            self.config.clone(),
            self.shared.clone(),
            token.clone(),
        ));

        if let Some(url) = self.config.socket_url.clone() {
            tokio::spawn(socket_pump(
                url,
                self.config.interval,
                self.shared.clone(),
                token,
            ));
        }
    }

    /// Stops the check tasks. The last published state remains readable.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.cancel.lock()
            && let Some(token) = guard.take()
        {
            token.cancel();
        }
    }
}

impl Drop for LivenessProbe {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Periodic HTTP readiness poll.
async fn http_pump(
    client: reqwest::Client,
    config: ProbeConfig,
    shared: Arc<ProbeShared>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.interval);
    // A slow check must not cause a burst of make-up ticks.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let ok = http::check(&client, &config.http_url, config.http_timeout).await;
                shared.report(ok);
            }
        }
    }
}
