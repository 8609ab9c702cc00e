//! Configuration structures for the tool orchestrator

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorConfig {
    /// Scheduling behavior for batch execution
    pub scheduler: SchedulerConfig,

    /// Result cache behavior
    pub cache: CacheConfig,

    /// Retry policy for failed attempts
    pub retry: RetryConfig,

    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,
}

impl OrchestratorConfig {
    /// Validate the complete configuration
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler.validate()?;
        self.cache.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        Ok(())
    }

    /// Create a configuration optimized for development
    pub fn development() -> Self {
        let mut config = Self::default();
        config.scheduler.max_concurrency = 2;
        config.scheduler.fail_fast = true; // Fail fast in development
        config.retry.max_attempts = 2; // Lower for faster feedback
        config.retry.base_delay = Duration::from_millis(50);
        config.circuit_breaker.reset_timeout = Duration::from_secs(5);
        config.cache.default_ttl = Duration::from_secs(60);
        config
    }

    /// Create a configuration optimized for production
    pub fn production() -> Self {
        let mut config = Self::default();
        config.scheduler.max_concurrency = 8;
        config.scheduler.fail_fast = false;
        config.retry.max_attempts = 3;
        config.retry.base_delay = Duration::from_millis(200);
        config.retry.max_delay = Duration::from_secs(30);
        config.circuit_breaker.reset_timeout = Duration::from_secs(60);
        config.cache.default_ttl = Duration::from_secs(600); // 10 minutes
        config
    }
}

/// Configuration for batch scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of calls running at the same time within a level
    pub max_concurrency: usize,

    /// Skip all pending calls once any call fails
    pub fail_fast: bool,

    /// Run independent calls in parallel (false = strict sequential order)
    pub parallel: bool,

    /// Timeout applied to calls whose definition does not set one
    pub default_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            fail_fast: false,
            parallel: true,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".to_string());
        }

        if self.default_timeout.is_zero() {
            return Err("default_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Configuration for the result cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether results are cached at all
    pub enabled: bool,

    /// Lifetime of entries whose definition does not set its own TTL
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), String> {
        if self.enabled && self.default_ttl.is_zero() {
            return Err("default_ttl must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Configuration for the retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound on any single retry delay
    pub max_delay: Duration,

    /// Exponential growth factor between retries
    pub backoff_multiplier: f32,

    /// Fraction of the computed delay added as random jitter (0.0 disables)
    pub jitter_fraction: f32,

    /// Whether unclassified failures are treated as transient
    pub retry_unknown: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
            retry_unknown: true,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be at least 1.0".to_string());
        }

        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err("jitter_fraction must be between 0.0 and 1.0".to_string());
        }

        if self.base_delay > self.max_delay {
            return Err("base_delay must not exceed max_delay".to_string());
        }

        Ok(())
    }
}

/// Configuration for per-operation circuit breakers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,

    /// Time an open breaker waits before admitting a probe
    pub reset_timeout: Duration,

    /// Successful probes required to close a half-open breaker
    pub success_threshold: u32,

    /// Probe requests admitted while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }

        if self.half_open_max_requests < self.success_threshold {
            return Err(
                "half_open_max_requests must be at least success_threshold".to_string(),
            );
        }

        if self.reset_timeout.is_zero() {
            return Err("reset_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_preset_configs_are_valid() {
        assert!(OrchestratorConfig::development().validate().is_ok());
        assert!(OrchestratorConfig::production().validate().is_ok());
    }

    #[test]
    fn test_invalid_scheduler_config() {
        let mut config = OrchestratorConfig::default();
        config.scheduler.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_retry_config() {
        let mut config = OrchestratorConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.retry.base_delay = Duration::from_secs(60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_breaker_config() {
        let mut config = OrchestratorConfig::default();
        config.circuit_breaker.success_threshold = 5;
        config.circuit_breaker.half_open_max_requests = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = OrchestratorConfig::production();
        let json = serde_json::to_string(&config).unwrap();
        let restored: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            restored.scheduler.max_concurrency,
            config.scheduler.max_concurrency
        );
        assert_eq!(restored.retry.max_delay, config.retry.max_delay);
        assert_eq!(
            restored.circuit_breaker.failure_threshold,
            config.circuit_breaker.failure_threshold
        );
    }
}
