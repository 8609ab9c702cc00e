//! Circuit breaking for repeatedly failing operations

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use crate::config::CircuitBreakerConfig;

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected until the reset timeout elapses
    Open,
    /// A limited number of probe requests is admitted
    HalfOpen,
}

/// Circuit breaker guarding a single operation.
///
/// Closed counts consecutive failures and opens at the threshold. An open
/// breaker rejects requests until `reset_timeout` has passed, then moves to
/// half-open as a side effect of the next admission check and grants a
/// bounded number of probes. Enough successful probes close it; any failed
/// probe reopens it with a fresh timeout.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_permits: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_permits: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a request may proceed right now. Checking an open breaker
    /// whose reset timeout has elapsed transitions it to half-open and
    /// consumes the first probe permit.
    pub fn allows_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(opened_at) = self.opened_at {
                    if opened_at.elapsed() >= self.config.reset_timeout {
                        self.state = CircuitState::HalfOpen;
                        self.half_open_successes = 0;
                        self.half_open_permits = 1;
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => {
                if self.half_open_permits < self.config.half_open_max_requests {
                    self.half_open_permits += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call. Returns the new state when this success
    /// caused a transition.
    pub fn record_success(&mut self) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.consecutive_failures = 0;
                    self.half_open_successes = 0;
                    self.half_open_permits = 0;
                    self.opened_at = None;
                    Some(CircuitState::Closed)
                } else {
                    None
                }
            }
            // A success from a call admitted before the breaker opened.
            CircuitState::Open => None,
        }
    }

    /// Records a failed call. Returns the new state when this failure
    /// caused a transition.
    pub fn record_failure(&mut self) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.trip();
                    return Some(CircuitState::Open);
                }
                None
            }
            CircuitState::HalfOpen => {
                self.trip();
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.half_open_successes = 0;
        self.half_open_permits = 0;
    }
}

/// One breaker per operation name
pub struct BreakerRegistry {
    breakers: DashMap<String, CircuitBreaker>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn allows_request(&self, operation: &str) -> bool {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .allows_request()
    }

    pub fn record_success(&self, operation: &str) -> Option<CircuitState> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .record_success()
    }

    pub fn record_failure(&self, operation: &str) -> Option<CircuitState> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .record_failure()
    }

    /// Current state of one breaker, without side effects.
    pub fn state(&self, operation: &str) -> Option<CircuitState> {
        self.breakers.get(operation).map(|breaker| breaker.state())
    }

    /// Snapshot of every known breaker.
    pub fn states(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    /// Forget all breakers, returning every operation to closed.
    pub fn reset(&self) {
        self.breakers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(50),
            success_threshold: 2,
            half_open_max_requests: 2,
        }
    }

    #[test]
    fn test_opens_at_failure_threshold() {
        let mut breaker = CircuitBreaker::new(config());

        assert_eq!(breaker.record_failure(), None);
        assert_eq!(breaker.record_failure(), None);
        assert_eq!(breaker.record_failure(), Some(CircuitState::Open));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allows_request());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(config());

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_transitions_to_half_open_after_timeout() {
        let mut breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.allows_request());

        std::thread::sleep(Duration::from_millis(70));

        // The admission check itself performs the transition.
        assert!(breaker.allows_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_probe_budget() {
        let mut breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(70));

        assert!(breaker.allows_request()); // first probe
        assert!(breaker.allows_request()); // second probe
        assert!(!breaker.allows_request()); // budget exhausted
    }

    #[test]
    fn test_successful_probes_close_the_breaker() {
        let mut breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(70));
        assert!(breaker.allows_request());

        assert_eq!(breaker.record_success(), None);
        assert_eq!(breaker.record_success(), Some(CircuitState::Closed));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allows_request());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let mut breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(70));
        assert!(breaker.allows_request());

        assert_eq!(breaker.record_failure(), Some(CircuitState::Open));
        assert!(!breaker.allows_request());
    }

    #[test]
    fn test_registry_isolates_operations() {
        let registry = BreakerRegistry::new(config());

        for _ in 0..3 {
            registry.record_failure("flaky");
        }
        assert!(!registry.allows_request("flaky"));
        assert!(registry.allows_request("healthy"));

        assert_eq!(registry.state("flaky"), Some(CircuitState::Open));
        assert_eq!(registry.state("healthy"), Some(CircuitState::Closed));
        assert_eq!(registry.state("never-seen"), None);

        let states = registry.states();
        assert_eq!(states.len(), 2);
        assert_eq!(states["flaky"], CircuitState::Open);
    }

    #[test]
    fn test_registry_reset() {
        let registry = BreakerRegistry::new(config());
        for _ in 0..3 {
            registry.record_failure("flaky");
        }
        registry.reset();
        assert!(registry.allows_request("flaky"));
    }
}
