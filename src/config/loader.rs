//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// An environment override that could not be parsed and was skipped.
///
/// Overrides are applied before logging is installed, so callers log these
/// once the subscriber is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideWarning {
    pub key: &'static str,
    pub value: String,
}

impl std::fmt::Display for OverrideWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ignoring invalid {}={:?}", self.key, self.value)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides, then validate. Skipped overrides are returned alongside.
pub fn load_config(path: Option<&Path>) -> Result<(ProxyConfig, Vec<OverrideWarning>), ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ProxyConfig::default(),
    };

    let warnings = apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok((config, warnings))
}

/// Overlay deployment environment variables on top of a config.
///
/// `lookup` abstracts the environment so tests never touch process state.
/// Empty values are treated as unset; unparseable ones are skipped and
/// reported in the returned list.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Vec<OverrideWarning>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let mut warnings = Vec::new();
    let mut skip = |key: &'static str, value: String| warnings.push(OverrideWarning { key, value });

    if let Some(raw) = get("UPSTREAMS") {
        config.upstreams = parse_upstream_list(&raw);
    }

    if let Some(port) = get("PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => config.listener.bind_address = format!("0.0.0.0:{}", port),
            Err(_) => skip("PORT", port),
        }
    }

    if let Some(level) = get("LOG_LEVEL") {
        config.observability.log_level = level.trim().to_lowercase();
    }

    if let Some(raw) = get("HEALTH_CHECK_INTERVAL") {
        match parse_duration(&raw) {
            Some(d) => config.health_check.interval_ms = d.as_millis() as u64,
            None => skip("HEALTH_CHECK_INTERVAL", raw),
        }
    }

    if let Some(raw) = get("SHUTDOWN_TIMEOUT") {
        match parse_duration(&raw) {
            Some(d) => config.listener.shutdown_timeout_secs = d.as_secs(),
            None => skip("SHUTDOWN_TIMEOUT", raw),
        }
    }

    if let Some(raw) = get("RATE_LIMIT_DEFAULT_CAPACITY") {
        match raw.trim().parse() {
            Ok(v) => config.rate_limit.capacity = v,
            Err(_) => skip("RATE_LIMIT_DEFAULT_CAPACITY", raw),
        }
    }

    if let Some(raw) = get("RATE_LIMIT_DEFAULT_RATE") {
        match raw.trim().parse() {
            Ok(v) => config.rate_limit.refill_rate = v,
            Err(_) => skip("RATE_LIMIT_DEFAULT_RATE", raw),
        }
    }

    warnings
}

/// Split a comma-separated upstream list, dropping blank entries.
pub fn parse_upstream_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `500ms`, `5s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        _ => None,
    }
}
