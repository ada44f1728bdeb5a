//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a loopback service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Loopback dispatch settings.
    pub dispatch: DispatchConfig,

    /// External call caching.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Inbound request timeout (whole call chain) in seconds.
    pub request_secs: u64,

    /// Timeout for external calls in seconds.
    pub outbound_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            outbound_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Fail reads of undeclared request/response properties.
    pub strict_guard: bool,

    /// Maximum inbound body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strict_guard: false,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// External call caching. No rules means nothing is cached.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Ordered rules; the first matching pattern decides the TTL.
    pub rules: Vec<CacheRuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheRuleConfig {
    /// Regular expression matched against the full URL.
    pub pattern: String,

    /// Time to live in milliseconds.
    pub ttl_ms: u64,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.timeouts.request_secs, 30);
        assert!(!config.dispatch.strict_guard);
        assert!(config.cache.rules.is_empty());
    }

    #[test]
    fn test_cache_rules_parse_in_order() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [dispatch]
            strict_guard = true

            [[cache.rules]]
            pattern = "^https://api\\.example\\.com/"
            ttl_ms = 5000

            [[cache.rules]]
            pattern = ".*"
            ttl_ms = 100
            "#,
        )
        .unwrap();

        assert!(config.dispatch.strict_guard);
        assert_eq!(config.cache.rules.len(), 2);
        assert_eq!(config.cache.rules[0].ttl_ms, 5000);
        assert_eq!(config.cache.rules[1].pattern, ".*");
    }
}
