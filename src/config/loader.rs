//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{RelayConfig, StoreBackend};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides to, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: RelayConfig = toml::from_str(&content)?;
    finish(config)
}

/// Defaults plus environment overrides, for running without a config file.
pub fn load_from_env() -> Result<RelayConfig, ConfigError> {
    finish(RelayConfig::default())
}

fn finish(mut config: RelayConfig) -> Result<RelayConfig, ConfigError> {
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay secrets and deployment-specific values from the environment.
///
/// `lookup` abstracts `std::env::var` so overrides can be tested without
/// touching process state.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(tokens) = lookup("RELAY_TOKENS") {
        config.origin.tokens = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(url) = lookup("RELAY_BROKER_URL") {
        config.publisher.url = url;
    }
    if let Some(url) = lookup("RELAY_REDIS_URL") {
        config.store.url = url;
        config.store.backend = StoreBackend::Redis;
    }
    if let Some(level) = lookup("RELAY_LOG_LEVEL") {
        config.observability.log_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_env_overrides_split_tokens() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RELAY_TOKENS", "tok-aaaa, tok-bbbb,,tok-cccc "),
            ("RELAY_BROKER_URL", "amqp://relay:s3cret@mq:5672/relay"),
        ]);
        let mut config = RelayConfig::default();

        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.origin.tokens, vec!["tok-aaaa", "tok-bbbb", "tok-cccc"]);
        assert_eq!(config.publisher.url, "amqp://relay:s3cret@mq:5672/relay");
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_redis_url_selects_redis_store() {
        let mut config = RelayConfig::default();

        apply_env_overrides(&mut config, |k| {
            (k == "RELAY_REDIS_URL").then(|| "redis://cache:6379/1".to_string())
        });

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url, "redis://cache:6379/1");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\ncapacity = 0\nwindow_secs = 0").unwrap();

        // Tokens may come from the environment; validation fails on the limits regardless.
        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.field == "rate_limit.capacity"));
                assert!(errors.iter().any(|e| e.field == "rate_limit.window_secs"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit\ncapacity = ").unwrap();

        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }
}
