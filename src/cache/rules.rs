//! Cacheability rules for external calls.

use std::time::Duration;

use axum::http::Method;
use regex::Regex;

use crate::config::CacheRuleConfig;

/// A URL pattern and how long matching responses may be reused.
#[derive(Debug, Clone)]
pub struct CacheRule {
    pattern: Regex,
    ttl: Duration,
}

impl CacheRule {
    pub fn new(pattern: &str, ttl: Duration) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            ttl,
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Ordered rule list; the first matching rule decides the TTL.
#[derive(Debug, Clone, Default)]
pub struct CacheRules {
    rules: Vec<CacheRule>,
}

impl CacheRules {
    pub fn new(rules: Vec<CacheRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(rules: &[CacheRuleConfig]) -> Result<Self, regex::Error> {
        rules
            .iter()
            .map(|r| CacheRule::new(&r.pattern, Duration::from_millis(r.ttl_ms)))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// TTL for a call, or `None` if it must not be cached.
    ///
    /// Only GET calls are eligible, whatever the URL.
    pub fn ttl_for(&self, method: &Method, url: &str) -> Option<Duration> {
        if method != Method::GET {
            return None;
        }
        self.rules.iter().find(|r| r.matches(url)).map(CacheRule::ttl)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
