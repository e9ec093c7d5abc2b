use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cache configuration.
///
/// The cache holds the rate limiter's per-(user, tier) window counters.
/// Balances are never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CacheConfig {
    /// In-memory cache. Good for single-node deployments.
    /// Data is lost on restart. Not suitable for multi-node.
    Memory(MemoryCacheConfig),

    /// Redis cache. Required for multi-node deployments.
    Redis(RedisCacheConfig),
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Memory(MemoryCacheConfig::default())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CacheConfig::Memory(c) => c.validate(),
            CacheConfig::Redis(c) => c.validate(),
        }
    }
}

/// In-memory cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCacheConfig {
    /// Soft limit on window buckets kept in memory. Past it, expired buckets
    /// are evicted; live buckets are kept even if the limit is exceeded.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

impl MemoryCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Memory cache max_entries must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    100_000
}

/// Redis cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisCacheConfig {
    /// Redis connection URL.
    /// Format: redis://[user:password@]host:port[/database]
    pub url: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_redis_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all cache keys.
    /// Useful when sharing a Redis instance with other applications.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl RedisCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        if !cfg!(feature = "redis") {
            return Err(ConfigError::Validation(
                "cache type 'redis' requires the 'redis' feature".into(),
            ));
        }
        Ok(())
    }
}

fn default_redis_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "gw:".into()
}
