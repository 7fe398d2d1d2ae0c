//! Per-node retry policies with exponential backoff
//!
//! A node with a [`RetryPolicy`] that fails is re-run inside the same
//! superstep, with the same task id and the same input snapshot, until it
//! succeeds or the attempt budget is spent. Only after the budget is exhausted
//! does the failure count against the step.
//!
//! ```text
//! attempt 1 ── fail ──► sleep(initial)
//! attempt 2 ── fail ──► sleep(initial × factor)
//! attempt 3 ── fail ──► task error recorded, step fails after the barrier
//! ```
//!
//! Delay for the n-th retry (0-indexed):
//!
//! ```text
//! delay = min(initial_interval × backoff_factor^n, max_interval)
//! if jitter: delay *= random(0.5..=1.5)
//! ```
//!
//! Interrupts are control flow and are never retried, neither are errors that
//! would fail identically on every attempt (invalid writes, configuration).
//!
//! ```rust
//! use pregel_core::RetryPolicy;
//!
//! let policy = RetryPolicy::new(5)
//!     .with_initial_interval(0.2)
//!     .with_backoff_factor(3.0)
//!     .with_max_interval(10.0)
//!     .with_jitter(false);
//!
//! assert!(policy.should_retry(4));
//! assert!(!policy.should_retry(5));
//! assert_eq!(policy.calculate_delay(1).as_millis(), 600);
//! ```

use crate::error::GraphError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retrying failed node executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::ZERO;
        }

        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_interval).max(0.0);

        let final_delay = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Whether another attempt is allowed after `attempts` attempts were made
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }

    /// Whether `error` is worth another attempt
    pub fn is_retryable(&self, error: &GraphError) -> bool {
        !matches!(
            error,
            GraphError::Interrupted(_)
                | GraphError::InvalidUpdate(_)
                | GraphError::Validation(_)
                | GraphError::Configuration(_)
                | GraphError::MissingCheckpointer
                | GraphError::GraphRecursion { .. }
                | GraphError::Cancelled { .. }
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Attempts made by one task
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: usize,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::types::Interrupt;
    use serde_json::json;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, 0.5);
        assert_eq!(policy.backoff_factor, 2.0);
        assert_eq!(policy.max_interval, 128.0);
        assert!(policy.jitter);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(5)
            .with_initial_interval(1.0)
            .with_backoff_factor(2.0)
            .with_max_interval(100.0)
            .with_jitter(false);

        assert_eq!(policy.calculate_delay(0).as_secs_f64(), 1.0);
        assert_eq!(policy.calculate_delay(1).as_secs_f64(), 2.0);
        assert_eq!(policy.calculate_delay(3).as_secs_f64(), 8.0);
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::new(10)
            .with_initial_interval(10.0)
            .with_max_interval(50.0)
            .with_jitter(false);

        assert_eq!(policy.calculate_delay(5).as_secs_f64(), 50.0);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5).with_initial_interval(1.0);
        for _ in 0..20 {
            let delay = policy.calculate_delay(2).as_secs_f64();
            assert!((2.0..=6.0).contains(&delay));
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_interrupts_are_not_retryable() {
        let policy = RetryPolicy::default();
        let interrupt = GraphError::Interrupted(vec![Interrupt::new("i", json!(1))]);
        assert!(!policy.is_retryable(&interrupt));
        assert!(!policy.is_retryable(&GraphError::InvalidUpdate("x".into())));
        assert!(policy.is_retryable(&GraphError::node_execution("n", "flaky")));
    }

    #[test]
    fn test_partial_policy_deserializes() {
        let policy: RetryPolicy = serde_yaml::from_str("max_attempts: 4\njitter: false").unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert!(!policy.jitter);
        assert_eq!(policy.backoff_factor, 2.0);
    }

    #[test]
    fn test_retry_state() {
        let mut state = RetryState::new();
        state.record_attempt(Some("Error 1".to_string()));
        state.record_attempt(Some("Error 2".to_string()));
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_error.as_deref(), Some("Error 2"));
    }
}
