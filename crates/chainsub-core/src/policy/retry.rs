//! Exponential reconnect backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for reconnect attempts after a dropped connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of consecutive reconnect attempts; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Delay before the first reconnect attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Cap on the delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied to the delay on each failed attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th reconnect (1-based).
    /// Returns `None` once `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Returns `true` if another reconnect attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_retries.map_or(true, |max| attempt <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: Some(3),
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        });
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            multiplier: 10.0,
            ..Default::default()
        });
        let d5 = policy.next_delay(5).unwrap();
        assert_eq!(d5, Duration::from_millis(500));
    }

    #[test]
    fn unlimited_by_default() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert!(policy.should_retry(10_000));
        assert_eq!(policy.next_delay(10_000), Some(Duration::from_secs(60)));
    }
}
