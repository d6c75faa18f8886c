//! Configuration for the access layer.
//!
//! Every section has working defaults; a JSON document only needs the fields it overrides.
//! Durations are expressed in milliseconds.
//!
//! ```rust
//! use lifeline::config::ClientConfig;
//!
//! let config = ClientConfig::from_json_str(r#"{
//!     "retry": { "max_attempts": 4 },
//!     "refresh": { "queue_timeout_ms": 5000 },
//!     "cache": { "default_tier": "long", "overrides": [
//!         { "prefix": ["dashboard"], "tier": "short" }
//!     ] }
//! }"#).unwrap();
//! assert_eq!(config.retry.max_attempts, 4);
//! assert_eq!(config.retry.rate_limit_max_attempts, 2);
//! ```

use crate::cache::{CacheKey, CachePolicy, CacheTier, CacheWindow, WindowError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Call class; selects the retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallClass {
    Query,
    Mutation,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("retry.max_attempts must be > 0")]
    ZeroAttempts,
    #[error("retry.rate_limit_max_attempts ({rate_limit}) must be > 0 and < retry.max_attempts ({max})")]
    RateLimitBudget { rate_limit: u32, max: u32 },
    #[error("retry cap ({cap_ms}ms) must be >= base delay ({base_ms}ms)")]
    CapBelowBase { cap_ms: u64, base_ms: u64 },
    #[error("refresh.queue_timeout_ms must be > 0")]
    ZeroQueueTimeout,
    #[error(transparent)]
    Window(#[from] WindowError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub rate_limit_max_attempts: u32,
    pub base_delay_ms: u64,
    pub query_cap_ms: u64,
    pub mutation_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_max_attempts: 2,
            base_delay_ms: 1_000,
            query_cap_ms: 10_000,
            mutation_cap_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn query_cap(&self) -> Duration {
        Duration::from_millis(self.query_cap_ms)
    }

    pub fn mutation_cap(&self) -> Duration {
        Duration::from_millis(self.mutation_cap_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        let single = self.max_attempts == 1 && self.rate_limit_max_attempts == 1;
        if self.rate_limit_max_attempts == 0 || (self.rate_limit_max_attempts >= self.max_attempts && !single)
        {
            return Err(ConfigError::RateLimitBudget {
                rate_limit: self.rate_limit_max_attempts,
                max: self.max_attempts,
            });
        }
        for cap_ms in [self.query_cap_ms, self.mutation_cap_ms] {
            if self.base_delay_ms > 0 && cap_ms < self.base_delay_ms {
                return Err(ConfigError::CapBelowBase { cap_ms, base_ms: self.base_delay_ms });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// How long a request may wait for an in-flight renewal.
    pub queue_timeout_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { queue_timeout_ms: 10_000 }
    }
}

impl RefreshConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

/// Per-prefix cache window override. Either a tier or explicit windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheOverride {
    pub prefix: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<CacheTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evict_after_ms: Option<u64>,
}

impl CacheOverride {
    fn window(&self, fallback: CacheWindow) -> Result<CacheWindow, WindowError> {
        let base = self.tier.map(CacheTier::window).unwrap_or(fallback);
        let stale = self.stale_after_ms.map(Duration::from_millis).unwrap_or(base.stale_after());
        let evict = self.evict_after_ms.map(Duration::from_millis).unwrap_or(base.evict_after());
        CacheWindow::new(stale, evict)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_tier: CacheTier,
    pub overrides: Vec<CacheOverride>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { default_tier: CacheTier::Medium, overrides: Vec::new() }
    }
}

impl CacheConfig {
    /// Resolve into a cache policy, validating every override.
    pub fn policy(&self) -> Result<CachePolicy, ConfigError> {
        let default = self.default_tier.window();
        let mut policy = CachePolicy::new(default);
        for item in &self.overrides {
            let key = CacheKey::from_segments(item.prefix.clone());
            policy = policy.with_override(key, item.window(default)?);
        }
        Ok(policy)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub retry: RetryConfig,
    pub refresh: RefreshConfig,
    pub cache: CacheConfig,
}

impl ClientConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.refresh.queue_timeout_ms == 0 {
            return Err(ConfigError::ZeroQueueTimeout);
        }
        self.cache.policy()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ClientConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.refresh.queue_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry.query_cap(), Duration::from_secs(10));
        assert_eq!(config.retry.mutation_cap(), Duration::from_secs(30));
    }

    #[test]
    fn rate_limit_budget_must_be_smaller() {
        let err = ClientConfig::from_json_str(r#"{"retry":{"max_attempts":2,"rate_limit_max_attempts":2}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::RateLimitBudget { rate_limit: 2, max: 2 }));
    }

    #[test]
    fn cap_must_cover_base() {
        let err = ClientConfig::from_json_str(r#"{"retry":{"query_cap_ms":500}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::CapBelowBase { cap_ms: 500, base_ms: 1000 }));
    }

    #[test]
    fn zero_queue_timeout_rejected() {
        let err = ClientConfig::from_json_str(r#"{"refresh":{"queue_timeout_ms":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroQueueTimeout));
    }

    #[test]
    fn overrides_resolve_to_policy() {
        let config = ClientConfig::from_json_str(
            r#"{"cache":{"default_tier":"hourly","overrides":[
                {"prefix":["schools"],"tier":"short"},
                {"prefix":["schools","stats"],"stale_after_ms":1000,"evict_after_ms":2000}
            ]}}"#,
        )
        .unwrap();
        let policy = config.cache.policy().unwrap();
        let stats = policy.window_for(&CacheKey::from(["schools", "stats", "2024"]));
        assert_eq!(stats.stale_after(), Duration::from_secs(1));
        let list = policy.window_for(&CacheKey::from(["schools", "list"]));
        assert_eq!(list, CacheTier::Short.window());
        let users = policy.window_for(&CacheKey::from(["users"]));
        assert_eq!(users, CacheTier::Hourly.window());
    }

    #[test]
    fn inverted_override_window_rejected() {
        let err = ClientConfig::from_json_str(
            r#"{"cache":{"overrides":[{"prefix":["x"],"stale_after_ms":5000,"evict_after_ms":10}]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Window(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(ClientConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
    }
}
