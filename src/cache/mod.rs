mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use traits::{Cache, WindowResult};

use crate::config::CacheConfig;

/// Build the configured cache backend.
pub async fn from_config(config: &CacheConfig) -> CacheResult<Arc<dyn Cache>> {
    match config {
        CacheConfig::Memory(c) => {
            tracing::info!(
                max_entries = c.max_entries,
                "Using in-memory cache (single-node only)"
            );
            Ok(Arc::new(MemoryCache::new(c)))
        }
        #[cfg(feature = "redis")]
        CacheConfig::Redis(c) => {
            tracing::info!(key_prefix = %c.key_prefix, "Connecting to Redis cache");
            Ok(Arc::new(RedisCache::from_config(c).await?))
        }
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis(_) => Err(CacheError::Internal(
            "cache type 'redis' requires the 'redis' feature".into(),
        )),
    }
}
