//! Transition core for the combined probe signal.

use crate::types::LivenessState;

/// Edge produced by a recorded check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessTransition {
    /// The backend was just declared lost.
    Disconnected,
    /// The backend was just declared reachable after a loss.
    Reconnected,
}

/// Counts consecutive failures across both probe signals and decides when
/// the combined state flips.
///
/// A loss is declared only after `threshold` consecutive failures, so a
/// single dropped probe never flaps the state; recovery is declared on the
/// first success after a loss. Each transition is yielded exactly once.
#[derive(Debug)]
pub struct ProbeTracker {
    threshold: u32,
    consecutive_failures: u32,
    state: LivenessState,
}

impl ProbeTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            state: LivenessState::Unknown,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// Records a successful check.
    pub fn record_success(&mut self) -> Option<LivenessTransition> {
        self.consecutive_failures = 0;
        match self.state {
            LivenessState::Offline => {
                self.state = LivenessState::Online;
                Some(LivenessTransition::Reconnected)
            }
            LivenessState::Unknown => {
                self.state = LivenessState::Online;
                None
            }
            LivenessState::Online => None,
        }
    }

    /// Records a failed check.
    pub fn record_failure(&mut self) -> Option<LivenessTransition> {
        if self.state == LivenessState::Offline {
            return None;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.state = LivenessState::Offline;
            return Some(LivenessTransition::Disconnected);
        }
        None
    }
}
