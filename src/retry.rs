//! Retry policy: classification-driven retry decisions and capped
//! exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::OrchestratorError;

/// Decides whether and when failed attempts are retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether the attempt that just failed should be followed by another.
    /// `attempt` is the number of the failed attempt, starting at 1.
    /// `operation_retryable` comes from the operation definition.
    pub fn should_retry(
        &self,
        error: &OrchestratorError,
        attempt: u32,
        operation_retryable: bool,
    ) -> bool {
        if attempt >= self.config.max_attempts || !operation_retryable {
            return false;
        }
        error.is_retryable(self.config.retry_unknown)
    }

    /// Delay to sleep before the given attempt. Attempt 2 (the first retry)
    /// waits the base delay; each further retry multiplies it, capped at the
    /// configured maximum, with uniform jitter added on top.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2) as i32;
        let millis = self.config.base_delay.as_millis() as f32
            * self.config.backoff_multiplier.powi(exponent);
        let delay = Duration::from_millis(millis as u64).min(self.config.max_delay);

        if self.config.jitter_fraction > 0.0 {
            let jitter_cap = delay.as_millis() as f32 * self.config.jitter_fraction;
            let jitter = rand::thread_rng().gen_range(0.0..=jitter_cap);
            delay + Duration::from_millis(jitter as u64)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            jitter_fraction: jitter,
            retry_unknown: true,
        })
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = policy(0.0);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy(0.0);
        // 100ms * 2^6 = 6400ms, above the 1000ms cap.
        assert_eq!(policy.delay_before(8), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_fraction() {
        let policy = policy(0.5);
        for _ in 0..50 {
            let delay = policy.delay_before(2);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(151));
        }
    }

    #[test]
    fn test_retry_decision_honors_attempt_budget() {
        let policy = policy(0.0);
        let err = OrchestratorError::execution("connection reset");
        assert!(policy.should_retry(&err, 1, true));
        assert!(policy.should_retry(&err, 3, true));
        assert!(!policy.should_retry(&err, 4, true));
    }

    #[test]
    fn test_retry_decision_honors_definition_flag() {
        let policy = policy(0.0);
        let err = OrchestratorError::execution("connection reset");
        assert!(!policy.should_retry(&err, 1, false));
    }

    #[test]
    fn test_retry_decision_honors_category() {
        let policy = policy(0.0);

        let validation = OrchestratorError::execution("invalid argument: limit");
        assert!(!policy.should_retry(&validation, 1, true));

        let timeout = OrchestratorError::timeout("fetch", Duration::from_secs(1));
        assert!(policy.should_retry(&timeout, 1, true));
    }

    #[test]
    fn test_unknown_retryability_is_policy() {
        let err = OrchestratorError::execution("something odd happened");

        let retry_unknown = policy(0.0);
        assert!(retry_unknown.should_retry(&err, 1, true));

        let mut config = RetryConfig::default();
        config.retry_unknown = false;
        config.jitter_fraction = 0.0;
        let no_unknown = RetryPolicy::new(config);
        assert!(!no_unknown.should_retry(&err, 1, true));
    }
}
