//! Exponential backoff with jitter for cancellation retries.
//!
//! The orchestrator waits [`RetryPolicy::delay_for`] after the n-th failed
//! attempt of a strategy before trying the same strategy again. Automation
//! pool exhaustion uses its own fixed delay ([`RetryPolicy::session_retry_delay`])
//! so provider backoff and slot contention do not compound.

use std::time::Duration;

use rand::Rng;

/// Default per-strategy attempt cap.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunable retry parameters, shared by every strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed per strategy before falling back or failing.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Fraction of the delay randomised in either direction (0.0 disables jitter).
    pub jitter: f64,
    /// Wait applied when no automation session slot was available.
    pub session_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
            session_retry_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff without jitter after `failed_attempts` consecutive failures (1-based).
    pub fn base_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(32) as i32;
        let ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(ms.min(max_ms) as u64)
    }

    /// Backoff with jitter applied, still clamped to [`max_delay`](Self::max_delay).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let base = self.base_delay(failed_attempts);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Whether another attempt of the same strategy is allowed.
    pub fn has_attempts_left(&self, attempts_used: u32) -> bool {
        attempts_used < self.max_attempts
    }
}
