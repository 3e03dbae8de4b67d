//! Startup retry policy
//!
//! Bounded exponential backoff: attempt 1 is immediate, the delay before
//! attempt n (n >= 2) is `min(base * 2^(n-2), max)`. Each attempt (connect
//! plus exchange declaration) is bounded by `attempt_timeout`.

use std::time::Duration;

/// Retry budget and backoff parameters for the startup connection sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            attempt_timeout: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before `attempt` (1-based); `None` for the first attempt
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 {
            return None;
        }
        let exponent = attempt - 2;
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    /// Full delay schedule between attempts 2..=max_attempts
    pub fn schedule(&self) -> Vec<Duration> {
        (2..=self.max_attempts)
            .filter_map(|attempt| self.delay_before(attempt))
            .collect()
    }

    /// Worst-case time spent sleeping before giving up
    pub fn total_backoff(&self) -> Duration {
        self.schedule().into_iter().sum()
    }

    /// Decide what to do after `failed_attempts` consecutive failures
    pub fn decide(&self, failed_attempts: u32, shutdown_requested: bool) -> RetryDecision {
        if shutdown_requested {
            return RetryDecision::AbortShutdownRequested;
        }
        if failed_attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let attempt = failed_attempts + 1;
        RetryDecision::Proceed {
            attempt,
            delay: self.delay_before(attempt).unwrap_or(Duration::ZERO),
        }
    }
}

/// Decision for the next connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// Retry budget exhausted
    GiveUp,
    /// Shutdown requested, stop retrying
    AbortShutdownRequested,
}
