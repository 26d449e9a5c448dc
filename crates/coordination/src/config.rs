//! Tuning values for the breaker and the lock backends.

use std::time::Duration;

/// Circuit breaker thresholds.
///
/// These are operational tuning values, not invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive remote failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a single trial is allowed.
    pub cooldown: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Settings shared by the coordinator and both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinationConfig {
    pub breaker: CircuitBreakerConfig,
    /// How long the remote backend keeps retrying a held key before giving up.
    pub remote_acquire_timeout: Duration,
    /// Upper bound on a single round trip to the remote service.
    pub remote_command_timeout: Duration,
    /// How long the fallback waits on another holder's row lock.
    pub fallback_lock_timeout: Duration,
    /// Lease used by callers that do not pick their own.
    pub default_ttl: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            remote_acquire_timeout: Duration::from_secs(3),
            remote_command_timeout: Duration::from_millis(500),
            fallback_lock_timeout: Duration::from_secs(5),
            default_ttl: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CoordinationConfig::default();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(30));
        assert_eq!(config.default_ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_threshold_is_at_least_one() {
        let config = CircuitBreakerConfig::new(0, Duration::from_secs(1));
        assert_eq!(config.failure_threshold, 1);
    }
}
