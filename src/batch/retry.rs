use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::CheckResult;

/// Bounded retry for transient lookup failures (network, timeout, 5xx).
/// `max_retries = 0` disables retrying, which is the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Whether `result` from attempt number `attempt` (1-based) should be retried.
    pub fn should_retry(&self, result: &CheckResult, attempt: u32) -> bool {
        attempt <= self.max_retries
            && result
                .failure_reason()
                .map(|r| r.is_transient())
                .unwrap_or(false)
    }

    /// Exponential: base * 2^(attempt - 1), capped, plus random jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff_ms as f64;
        let max = self.max_backoff_ms as f64;

        let raw_backoff = base * 2_f64.powi(attempt.saturating_sub(1) as i32);
        let capped_backoff = raw_backoff.min(max);

        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };

        Duration::from_millis((capped_backoff as u64) + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureReason;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 350,
            jitter_ms: 0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(10), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_backoff_ms: 100,
            max_backoff_ms: 100,
            jitter_ms: 50,
        };
        for _ in 0..100 {
            let d = policy.backoff(1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_only_transient_failures_are_retried() {
        let policy = RetryPolicy::with_max_retries(2);
        let timeout = CheckResult::failure(FailureReason::Timeout, "t");
        let client_err = CheckResult::failure(FailureReason::Upstream4xx, "403");

        assert!(policy.should_retry(&timeout, 1));
        assert!(policy.should_retry(&timeout, 2));
        assert!(!policy.should_retry(&timeout, 3), "budget exhausted");
        assert!(!policy.should_retry(&client_err, 1));
        assert!(!policy.should_retry(&CheckResult::no_record(), 1));
    }

    #[test]
    fn test_default_never_retries() {
        let timeout = CheckResult::failure(FailureReason::Network, "reset");
        assert!(!RetryPolicy::default().should_retry(&timeout, 1));
    }
}
