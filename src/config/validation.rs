//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check every cache rule compiles
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} `{value}`")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("cache rule {index} has invalid pattern: {reason}")]
    InvalidCachePattern { index: usize, reason: String },

    #[error("cache rule {index} has a zero ttl")]
    ZeroTtl { index: usize },

    #[error("unknown log level `{0}`")]
    UnknownLogLevel(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroValue {
            field: "timeouts.request_secs",
        });
    }
    if config.timeouts.outbound_secs == 0 {
        errors.push(ValidationError::ZeroValue {
            field: "timeouts.outbound_secs",
        });
    }
    if config.dispatch.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroValue {
            field: "dispatch.max_body_bytes",
        });
    }

    for (index, rule) in config.cache.rules.iter().enumerate() {
        if let Err(e) = regex::Regex::new(&rule.pattern) {
            errors.push(ValidationError::InvalidCachePattern {
                index,
                reason: e.to_string(),
            });
        }
        if rule.ttl_ms == 0 {
            errors.push(ValidationError::ZeroTtl { index });
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
