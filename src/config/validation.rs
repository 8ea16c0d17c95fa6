//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacity > 0, windows > 0, ratios in range)
//! - Check addresses, broker and store URLs parse before any subsystem starts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use lapin::uri::AMQPUri;
use std::net::SocketAddr;

use crate::config::schema::{CircuitBreakerConfig, RelayConfig, StoreBackend};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.origin.tokens.is_empty() {
        errors.push(ValidationError::new("origin.tokens", "at least one token is required"));
    }
    if config.origin.tokens.iter().any(|t| t.trim().is_empty()) {
        errors.push(ValidationError::new("origin.tokens", "tokens must not be blank"));
    }
    if url::Url::parse(&config.origin.base_url).is_err() {
        errors.push(ValidationError::new("origin.base_url", "not a valid URL"));
    }
    if config.origin.request_timeout_secs == 0 {
        errors.push(ValidationError::new("origin.request_timeout_secs", "must be > 0"));
    }

    let rl = &config.rate_limit;
    if rl.capacity == 0 {
        errors.push(ValidationError::new("rate_limit.capacity", "must be > 0"));
    }
    if rl.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be > 0"));
    }
    if rl.max_total_wait_secs == 0 {
        errors.push(ValidationError::new("rate_limit.max_total_wait_secs", "must be > 0"));
    }
    if !(0.0..=1.0).contains(&rl.jitter_ratio) {
        errors.push(ValidationError::new("rate_limit.jitter_ratio", "must be within [0, 1]"));
    }
    if matches!(&rl.key, Some(k) if k.trim().is_empty()) {
        errors.push(ValidationError::new("rate_limit.key", "must not be blank"));
    }

    check_breaker("breakers.store", &config.breakers.store, &mut errors);
    check_breaker("breakers.publisher", &config.breakers.publisher, &mut errors);

    if config.store.backend == StoreBackend::Redis
        && redis::Client::open(config.store.url.as_str()).is_err()
    {
        errors.push(ValidationError::new("store.url", "not a valid Redis URL"));
    }
    if config.store.request_timeout_ms == 0 {
        errors.push(ValidationError::new("store.request_timeout_ms", "must be > 0"));
    }

    let publisher = &config.publisher;
    if publisher.url.parse::<AMQPUri>().is_err() {
        errors.push(ValidationError::new("publisher.url", "not a valid AMQP URI"));
    }
    if publisher.queue.trim().is_empty() {
        errors.push(ValidationError::new("publisher.queue", "must not be empty"));
    }
    if publisher.max_retries == 0 {
        errors.push(ValidationError::new("publisher.max_retries", "must be > 0"));
    }
    if publisher.request_timeout_secs == 0 {
        errors.push(ValidationError::new("publisher.request_timeout_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a valid socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(prefix: &str, breaker: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.max_failures == 0 {
        errors.push(ValidationError::new(format!("{}.max_failures", prefix), "must be > 0"));
    }
    if breaker.half_open_max_attempts == 0 {
        errors.push(ValidationError::new(
            format!("{}.half_open_max_attempts", prefix),
            "must be > 0",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.origin.tokens = vec!["token-0001".into()];
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.origin.tokens.clear();
        config.rate_limit.capacity = 0;
        config.breakers.publisher.max_failures = 0;
        config.observability.metrics_address = "nope".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "origin.tokens",
                "rate_limit.capacity",
                "breakers.publisher.max_failures",
                "observability.metrics_address",
            ]
        );
    }

    #[test]
    fn test_broker_and_store_urls_checked() {
        let mut config = valid_config();
        config.publisher.url = "http://rabbit:15672".into();
        config.store.backend = StoreBackend::Redis;
        config.store.url = "memcached://cache".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["store.url", "publisher.url"]);
    }

    #[test]
    fn test_store_url_ignored_for_memory_backend() {
        let mut config = valid_config();
        config.store.url = "memcached://cache".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_metrics_address_ignored_when_disabled() {
        let mut config = valid_config();
        config.observability.metrics_enabled = false;
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());
    }
}
