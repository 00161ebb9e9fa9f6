//! Exponential reconnect backoff policy.
//!
//! Pure arithmetic: the policy computes delays, the stream driver sleeps.
//! Keeping it free of timers means the monotonicity and cap properties are
//! testable without a runtime.

use std::time::Duration;

/// Delay schedule for stream reconnect attempts.
///
/// Attempt `n` (1-based) waits `initial × multiplierⁿ⁻¹`, capped at
/// `max_delay`. When `max_attempts` is set and exhausted, the stream gives
/// up and fails instead of scheduling another attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Growth factor between consecutive attempts.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 1.8,
            max_delay: Duration::from_secs(15),
            max_attempts: Some(5),
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = self.multiplier.powi(exponent as i32);
        let delay = self.initial.mul_f64(factor.max(0.0));
        delay.min(self.max_delay)
    }

    /// Whether `attempt` (1-based) exceeds the attempt budget.
    #[must_use]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}
