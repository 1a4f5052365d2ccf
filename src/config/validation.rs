//! Configuration validation.
//!
//! Semantic checks only; serde handles the syntax. Every problem found is
//! reported, not just the first one.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::load_balancer::upstream::parse_upstream_url;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one upstream must be configured")]
    NoUpstreams,

    #[error("invalid upstream {address:?}: {reason}")]
    InvalidUpstream { address: String, reason: String },

    #[error("invalid {field} address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Validate a deserialized configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstreams.is_empty() {
        errors.push(ValidationError::NoUpstreams);
    }
    for address in &config.upstreams {
        if let Err(e) = parse_upstream_url(address) {
            errors.push(ValidationError::InvalidUpstream {
                address: address.clone(),
                reason: e.to_string(),
            });
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let positive = [
        ("health_check.interval_ms", config.health_check.interval_ms),
        ("health_check.timeout_secs", config.health_check.timeout_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("rate_limit.capacity", u64::from(config.rate_limit.capacity)),
        ("rate_limit.refill_rate", u64::from(config.rate_limit.refill_rate)),
        ("rate_limit.max_clients", config.rate_limit.max_clients as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
