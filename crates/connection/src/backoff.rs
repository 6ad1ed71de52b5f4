//! Reconnect delay schedule.

use std::time::Duration;

/// Exponential backoff with a hard ceiling on both delay and attempt count.
///
/// `delay_for_attempt` is a pure function of the attempt number and this
/// configuration; the scheduler keeps no hidden state.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Retries allowed before the connection is declared failed.
    pub max_attempts: u32,
    /// Exponent cap, bounding growth independently of `max_delay`.
    pub cap_exponent: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            cap_exponent: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay for a retry attempt (1-based): `base * 2^(attempt-1)`, with the
    /// exponent capped and the result clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(self.cap_exponent).min(31);
        let factor = 1u32 << exp;
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether the attempt number exceeds the configured ceiling.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}
