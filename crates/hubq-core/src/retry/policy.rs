use std::time::Duration;

use crate::config::RetryConfig;
use crate::transfer::TransferError;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps, built from `[retry]` in config.toml.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
    /// Failed runs allowed per admission even when each one made progress.
    pub max_total_runs: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        let base = if cfg.base_delay_secs.is_finite() && cfg.base_delay_secs > 0.0 {
            Duration::from_secs_f64(cfg.base_delay_secs)
        } else {
            Duration::ZERO
        };
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: base,
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            max_total_runs: cfg.max_total_runs.max(cfg.max_attempts).max(1),
        }
    }
}

impl RetryPolicy {
    /// Decide whether a failed run should be retried in place.
    ///
    /// `attempt` counts consecutive failed runs without progress and `runs`
    /// counts every failed run of this admission; both are 1-based. Permanent
    /// errors and exhausted budgets return `RetryDecision::NoRetry`.
    pub fn decide(&self, attempt: u32, runs: u32, error: &TransferError) -> RetryDecision {
        if attempt >= self.max_attempts || runs >= self.max_total_runs {
            return RetryDecision::NoRetry;
        }

        match error {
            TransferError::Permanent(_) => RetryDecision::NoRetry,
            TransferError::Transient(_) => {
                // base * 2^(attempt-1), capped.
                let exp = 1u32 << attempt.saturating_sub(1).min(8);
                let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}
