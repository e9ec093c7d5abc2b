use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::{
    error::{CacheError, CacheResult},
    traits::{Cache, WindowResult},
};
use crate::config::RedisCacheConfig;

/// Lua script for an atomic fixed-window check and increment.
/// Returns [allowed (0/1), count, reset_at_ms]
///
/// The window is stored as a hash `{count, reset_at}` so the reset instant
/// survives across calls; `PEXPIRE` only garbage-collects stale windows.
/// Denied requests leave the hash untouched.
const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])

local count = tonumber(redis.call('HGET', key, 'count') or '0')
local reset_at = tonumber(redis.call('HGET', key, 'reset_at') or '0')

if reset_at == 0 or now_ms >= reset_at then
    count = 0
    reset_at = now_ms + window_ms
    redis.call('HSET', key, 'count', 0, 'reset_at', reset_at)
    redis.call('PEXPIRE', key, window_ms)
end

if count < limit then
    count = redis.call('HINCRBY', key, 'count', 1)
    return {1, count, reset_at}
else
    return {0, count, reset_at}
end
"#;

/// Redis-backed cache. Shares rate limit windows across gateway replicas.
pub struct RedisCache {
    client: redis::Client,
    key_prefix: String,
    connect_timeout: Duration,
}

impl RedisCache {
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let cache = Self {
            client,
            key_prefix: config.key_prefix.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        };
        // Fail at startup rather than on the first request.
        cache.ping().await?;
        Ok(cache)
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        match tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(CacheError::Internal(format!(
                "Redis connection timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn check_and_incr_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> CacheResult<WindowResult> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        let result: Vec<i64> = redis::Script::new(FIXED_WINDOW_SCRIPT)
            .key(&full_key)
            .arg(limit)
            .arg(window_ms)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let reset_at_ms = result
            .get(2)
            .copied()
            .unwrap_or_else(|| now.timestamp_millis().saturating_add(window_ms));
        let reset_at = Utc
            .timestamp_millis_opt(reset_at_ms)
            .single()
            .ok_or_else(|| CacheError::Internal(format!("invalid reset_at: {reset_at_ms}")))?;

        Ok(WindowResult {
            allowed: result.first().copied().unwrap_or(0) == 1,
            count: result
                .get(1)
                .copied()
                .and_then(|c| u32::try_from(c).ok())
                .unwrap_or(limit),
            limit,
            reset_at,
        })
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
