//! Retry policy for task execution: exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff applied to retryable task failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Ceiling on any single delay.
    pub max_interval: Duration,
    /// Total attempts including the first.
    pub max_attempts: usize,
    /// Randomize each delay within ±50% to avoid thundering herds.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(30),
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Policy with a given attempt budget and defaults otherwise.
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based: the delay after the
    /// first failure is `delay(1)`).
    pub fn delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());
        let seconds = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            capped * factor
        } else {
            capped
        };
        Duration::from_secs_f64(seconds.min(self.max_interval.as_secs_f64()))
    }
}
