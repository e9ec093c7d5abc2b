use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{
    error::{CacheError, CacheResult},
    traits::{Cache, WindowResult},
};
use crate::config::MemoryCacheConfig;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// In-memory cache implementation using DashMap for concurrent access.
///
/// # Multi-Node Deployments
///
/// **WARNING**: This cache is NOT suitable for multi-node deployments.
///
/// Each node keeps its own counters, so a user can receive `limit` requests
/// per window from every node. Use the Redis backend behind a load balancer.
///
/// # Capacity
///
/// `max_entries` is a soft limit. Past it, expired windows are swept before a
/// new key is inserted, but a live window is never dropped: doing so would
/// hand its user a fresh quota. Sweeps are skipped until the earliest window
/// seen by the previous sweep can have expired, so a full map of live
/// windows does not cost every new key a full scan.
pub struct MemoryCache {
    windows: DashMap<String, Window>,
    max_entries: usize,
    /// Earliest `reset_at` left by the last sweep; `None` sweeps on demand
    next_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        Self {
            windows: DashMap::new(),
            max_entries: config.max_entries,
            next_sweep: Mutex::new(None),
        }
    }

    /// Drop windows that have already reset. They carry no state: a lookup
    /// would start a fresh window anyway.
    fn evict_expired(&self, now: DateTime<Utc>) {
        if self.next_sweep.lock().is_some_and(|at| now < at) {
            return;
        }

        let before = self.windows.len();
        let mut earliest: Option<DateTime<Utc>> = None;
        self.windows.retain(|_, w| {
            let live = w.reset_at > now;
            if live {
                earliest = Some(earliest.map_or(w.reset_at, |e| e.min(w.reset_at)));
            }
            live
        });
        *self.next_sweep.lock() = earliest;

        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired rate limit windows");
        } else {
            tracing::debug!(
                entries = before,
                max_entries = self.max_entries,
                "Memory cache over capacity with no expired windows"
            );
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn check_and_incr_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> CacheResult<WindowResult> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| CacheError::Internal(format!("invalid window: {e}")))?;

        if self.windows.len() >= self.max_entries && !self.windows.contains_key(key) {
            self.evict_expired(now);
        }

        // The entry guard holds the shard write lock for the whole
        // check-and-increment.
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + window,
        });

        if now >= entry.reset_at {
            *entry = Window {
                count: 0,
                reset_at: now + window,
            };
        }

        if entry.count >= limit {
            return Ok(WindowResult {
                allowed: false,
                count: entry.count,
                limit,
                reset_at: entry.reset_at,
            });
        }

        entry.count += 1;
        Ok(WindowResult {
            allowed: true,
            count: entry.count,
            limit,
            reset_at: entry.reset_at,
        })
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
