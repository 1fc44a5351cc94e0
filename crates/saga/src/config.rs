//! Saga configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::services::CircuitBreakerConfig;

/// Orchestration settings with sensible defaults.
///
/// Reads from environment variables:
/// - `SAGA_MAX_ATTEMPTS`: forward step attempt bound (default: `3`)
/// - `SAGA_INITIAL_BACKOFF_MS`: first backoff delay (default: `50`)
/// - `SAGA_MAX_BACKOFF_MS`: backoff cap (default: `2000`)
/// - `SAGA_BACKOFF_MULTIPLIER`: exponential multiplier (default: `2.0`)
/// - `SAGA_STEP_TIMEOUT_MS`: per-attempt collaborator timeout (default: `5000`)
/// - `SAGA_COMPENSATION_ATTEMPTS`: compensation attempt bound (default: `5`)
/// - `IDEMPOTENCY_TTL_SECS`: idempotency record retention (default: `86400`)
/// - `IDEMPOTENCY_PURGE_INTERVAL_SECS`: eviction sweep period (default: `300`)
/// - `PAYMENT_BREAKER_FAILURES`: failures that open the payment breaker (default: `5`)
/// - `PAYMENT_BREAKER_COOLDOWN_MS`: open time before a half-open trial call (default: `30000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
///
/// Values that fail to parse fall back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub step_timeout: Duration,
    pub compensation_attempts: u32,
    pub idempotency_ttl: Duration,
    pub purge_interval: Duration,
    pub breaker_failures: u32,
    pub breaker_cooldown: Duration,
    pub log_level: String,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |name: &str| lookup(name).and_then(|raw| raw.trim().parse::<u64>().ok());
        let millis = |name: &str, default: Duration| {
            parse(name).map(Duration::from_millis).unwrap_or(default)
        };
        let secs = |name: &str, default: Duration| {
            parse(name).map(Duration::from_secs).unwrap_or(default)
        };

        Self {
            max_attempts: parsed(&lookup, "SAGA_MAX_ATTEMPTS", defaults.max_attempts),
            initial_backoff: millis("SAGA_INITIAL_BACKOFF_MS", defaults.initial_backoff),
            max_backoff: millis("SAGA_MAX_BACKOFF_MS", defaults.max_backoff),
            backoff_multiplier: parsed(
                &lookup,
                "SAGA_BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            ),
            step_timeout: millis("SAGA_STEP_TIMEOUT_MS", defaults.step_timeout),
            compensation_attempts: parsed(
                &lookup,
                "SAGA_COMPENSATION_ATTEMPTS",
                defaults.compensation_attempts,
            ),
            idempotency_ttl: secs("IDEMPOTENCY_TTL_SECS", defaults.idempotency_ttl),
            purge_interval: secs("IDEMPOTENCY_PURGE_INTERVAL_SECS", defaults.purge_interval),
            breaker_failures: parsed(&lookup, "PAYMENT_BREAKER_FAILURES", defaults.breaker_failures),
            breaker_cooldown: millis("PAYMENT_BREAKER_COOLDOWN_MS", defaults.breaker_cooldown),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Retry policy for forward steps and event publishing.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .initial_delay(self.initial_backoff)
            .max_delay(self.max_backoff)
            .multiplier(self.backoff_multiplier)
            .build()
    }

    /// Retry policy for compensating actions.
    pub fn compensation_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.compensation_attempts)
            .initial_delay(self.initial_backoff)
            .max_delay(self.max_backoff)
            .multiplier(self.backoff_multiplier)
            .build()
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failures,
            cooldown: self.breaker_cooldown,
        }
    }

    /// Idempotency retention as a `chrono` duration.
    pub fn idempotency_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.idempotency_ttl).unwrap_or(idempotency::DEFAULT_TTL)
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
            step_timeout: Duration::from_millis(5000),
            compensation_attempts: 5,
            idempotency_ttl: Duration::from_secs(86_400),
            purge_interval: Duration::from_secs(300),
            breaker_failures: 5,
            breaker_cooldown: Duration::from_millis(30_000),
            log_level: "info".to_string(),
        }
    }
}

fn parsed<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
