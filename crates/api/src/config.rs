//! Application configuration loaded from environment variables.

use std::time::Duration;

use coordination::{CircuitBreakerConfig, CoordinationConfig};
use domain::CouponConfig;
use outbox::{OutboxConfig, RetryPolicy};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for structured output, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory stores when unset
/// - `REDIS_URL`: remote lock service (default: `"redis://127.0.0.1:6379"`)
/// - `LOCK_FAILURE_THRESHOLD`, `LOCK_COOLDOWN_SECS`: circuit breaker tuning
/// - `LOCK_REMOTE_TIMEOUT_MS`, `LOCK_FALLBACK_TIMEOUT_MS`: lock acquisition timeouts
/// - `OUTBOX_MAX_ATTEMPTS`, `OUTBOX_WORKERS`: event delivery tuning
/// - `KAFKA_BROKERS`: bootstrap servers for event delivery (default: `"localhost:9092"`)
/// - `KAFKA_SEND_TIMEOUT_MS`: how long one delivery waits for acknowledgement
///
/// Zero timeouts are ignored; each one must bound a wait.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub kafka_brokers: String,
    pub kafka_send_timeout: Duration,
    pub coordination: CoordinationConfig,
    pub outbox: OutboxConfig,
    pub coupons: CouponConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds configuration from an arbitrary variable source.
    ///
    /// Unparseable numeric values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |name: &str| {
            number(name)
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
        };

        let breaker = CircuitBreakerConfig::new(
            number("LOCK_FAILURE_THRESHOLD")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.coordination.breaker.failure_threshold),
            number("LOCK_COOLDOWN_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.coordination.breaker.cooldown),
        );
        let coordination = CoordinationConfig {
            breaker,
            remote_acquire_timeout: millis("LOCK_REMOTE_TIMEOUT_MS")
                .unwrap_or(defaults.coordination.remote_acquire_timeout),
            fallback_lock_timeout: millis("LOCK_FALLBACK_TIMEOUT_MS")
                .unwrap_or(defaults.coordination.fallback_lock_timeout),
            ..defaults.coordination
        };

        let retry = RetryPolicy::new(
            number("OUTBOX_MAX_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.outbox.retry.max_attempts),
            defaults.outbox.retry.initial_backoff,
            defaults.outbox.retry.max_backoff,
        );
        let outbox = OutboxConfig {
            retry,
            workers: number("OUTBOX_WORKERS")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|&w| w > 0)
                .unwrap_or(defaults.outbox.workers),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT") {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            kafka_brokers: lookup("KAFKA_BROKERS")
                .filter(|brokers| !brokers.trim().is_empty())
                .unwrap_or(defaults.kafka_brokers),
            kafka_send_timeout: millis("KAFKA_SEND_TIMEOUT_MS").unwrap_or(defaults.kafka_send_timeout),
            coordination,
            outbox,
            coupons: CouponConfig {
                lock_ttl: coordination.default_ttl,
                ..defaults.coupons
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            kafka_brokers: "localhost:9092".to_string(),
            kafka_send_timeout: Duration::from_secs(5),
            coordination: CoordinationConfig::default(),
            outbox: OutboxConfig::default(),
            coupons: CouponConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_vars(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.coordination.breaker.failure_threshold, 5);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = from_vars(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.coordination, CoordinationConfig::default());
        assert_eq!(config.outbox, OutboxConfig::default());
    }

    #[test]
    fn test_reads_tuning_variables() {
        let config = from_vars(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("LOCK_FAILURE_THRESHOLD", "2"),
            ("LOCK_COOLDOWN_SECS", "7"),
            ("LOCK_REMOTE_TIMEOUT_MS", "250"),
            ("LOCK_FALLBACK_TIMEOUT_MS", "1500"),
            ("OUTBOX_MAX_ATTEMPTS", "6"),
            ("OUTBOX_WORKERS", "8"),
            ("KAFKA_BROKERS", "kafka-1:9092,kafka-2:9092"),
            ("KAFKA_SEND_TIMEOUT_MS", "800"),
        ]);

        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/shop")
        );
        assert_eq!(config.coordination.breaker.failure_threshold, 2);
        assert_eq!(config.coordination.breaker.cooldown, Duration::from_secs(7));
        assert_eq!(
            config.coordination.remote_acquire_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.coordination.fallback_lock_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(config.outbox.retry.max_attempts, 6);
        assert_eq!(config.outbox.workers, 8);
        assert_eq!(config.kafka_brokers, "kafka-1:9092,kafka-2:9092");
        assert_eq!(config.kafka_send_timeout, Duration::from_millis(800));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = from_vars(&[
            ("PORT", "http"),
            ("LOCK_FAILURE_THRESHOLD", "-3"),
            ("OUTBOX_WORKERS", "0"),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.coordination.breaker.failure_threshold, 5);
        assert_eq!(config.outbox.workers, 4);
    }

    #[test]
    fn test_zero_timeouts_fall_back() {
        let config = from_vars(&[
            ("LOCK_REMOTE_TIMEOUT_MS", "0"),
            ("LOCK_FALLBACK_TIMEOUT_MS", "0"),
            ("KAFKA_SEND_TIMEOUT_MS", "0"),
            ("KAFKA_BROKERS", "  "),
        ]);
        let defaults = Config::default();
        assert_eq!(
            config.coordination.fallback_lock_timeout,
            defaults.coordination.fallback_lock_timeout
        );
        assert!(config.coordination.fallback_lock_timeout > Duration::ZERO);
        assert_eq!(
            config.coordination.remote_acquire_timeout,
            defaults.coordination.remote_acquire_timeout
        );
        assert_eq!(config.kafka_send_timeout, defaults.kafka_send_timeout);
        assert_eq!(config.kafka_brokers, "localhost:9092");
    }
}
