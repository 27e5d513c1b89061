//! Retry policy engine for conveyor jobs.
//!
//! A [`RetryPolicy`] is pure data: a backoff strategy plus attempt and code
//! constraints. The two operations on it are deliberately separate:
//! [`RetryPolicy::should_retry`] answers *whether* another attempt is allowed,
//! [`RetryPolicy::calculate_delay`] answers *how long* to wait before it. That
//! split lets error-specific overrides (a rate-limit response naming its own
//! delay) compose with the generic backoff math, and keeps the whole layer
//! unit-testable without a live queue.
//!
//! Attempt numbers are 1-based throughout: attempt 1 is the first execution.

use std::time::Duration;

use conveyor_error::JobError;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    Fibonacci,
}

/// A named, data-driven retry profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub max_attempts: u32,
    pub base_delay: Duration,
    #[serde(default)]
    pub max_delay: Option<Duration>,
    /// Strategy multiplier; defaults to 1 for linear and 2 for exponential.
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub jitter: bool,
    /// When set, only these error codes are retried.
    #[serde(default)]
    pub retryable_codes: Option<Vec<String>>,
    /// Error codes that are never retried, regardless of their kind.
    #[serde(default)]
    pub non_retryable_codes: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Some(Duration::from_secs(60)),
            multiplier: None,
            jitter: true,
            retryable_codes: None,
            non_retryable_codes: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Profile for jobs that must not be lost: more attempts, tighter base.
    pub fn critical() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(120)),
            ..Self::default()
        }
    }

    /// Profile for bulk background work that can afford long waits.
    pub fn background() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Some(Duration::from_secs(300)),
            multiplier: Some(3.0),
            ..Self::default()
        }
    }

    /// Profile for latency-sensitive work: one quick retry, no jitter.
    pub fn realtime() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            max_delay: None,
            jitter: false,
            ..Self::default()
        }
    }

    /// Profile tuned for third-party APIs with occasional throttling.
    pub fn external_api() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 4,
            base_delay: Duration::from_secs(3),
            max_delay: Some(Duration::from_secs(60)),
            ..Self::default()
        }
    }

    /// Look up a built-in profile by name.
    pub fn profile(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "critical" => Some(Self::critical()),
            "background" => Some(Self::background()),
            "realtime" => Some(Self::realtime()),
            "external_api" => Some(Self::external_api()),
            _ => None,
        }
    }

    /// Compute the delay before the next attempt.
    ///
    /// A delay suggested by the error itself (rate-limit `retry_after`) wins
    /// over the strategy math; jitter still applies to it. Strategy results
    /// are capped at `max_delay` before jitter.
    pub fn calculate_delay(&self, attempt: u32, error: Option<&JobError>) -> Duration {
        let delay = match error.and_then(JobError::retry_after) {
            Some(suggested) => suggested,
            None => self.strategy_delay(attempt),
        };
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    fn strategy_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms * attempt as f64 * self.multiplier.unwrap_or(1.0),
            BackoffStrategy::Exponential => {
                base_ms * self.multiplier.unwrap_or(2.0).powi(attempt as i32 - 1)
            }
            BackoffStrategy::Fibonacci => base_ms * fibonacci(attempt) as f64,
        };
        let capped_ms = match self.max_delay {
            Some(max) => raw_ms.min(max.as_millis() as f64),
            None => raw_ms,
        };
        Duration::from_millis(capped_ms as u64)
    }

    /// Decide whether `attempt` (just failed with `error`) gets a successor.
    pub fn should_retry(&self, attempt: u32, error: &JobError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        let code = error.code();
        if self.non_retryable_codes.iter().any(|c| c == code) {
            return false;
        }
        if let Some(allowed) = &self.retryable_codes {
            if !allowed.iter().any(|c| c == code) {
                return false;
            }
        }
        error.is_retryable()
    }
}

/// Uniform random adjustment in [-25%, +25%], floored at zero.
fn apply_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(0.75..=1.25);
    let jittered = (delay.as_millis() as f64 * factor).max(0.0);
    Duration::from_millis(jittered as u64)
}

/// fib(0) = fib(1) = 1, saturating so absurd attempt numbers stay finite.
fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b): (u64, u64) = (1, 1);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}
