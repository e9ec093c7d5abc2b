use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::CacheResult;

/// Result of an atomic fixed-window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowResult {
    /// Whether the request was admitted (and counted)
    pub allowed: bool,
    /// Count in the window after this operation
    pub count: u32,
    /// The limit that was checked against
    pub limit: u32,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
}

impl WindowResult {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Atomically check a fixed-window counter and increment it.
    ///
    /// 1. If there is no window, or `now >= reset_at`: start a new window
    ///    with `count = 0, reset_at = now + window`
    /// 2. If `count < limit`: increment and return `allowed = true`
    /// 3. Otherwise: leave the window untouched and return `allowed = false`
    ///
    /// The whole sequence is one atomic unit per key, so two concurrent
    /// callers can never both take the last slot.
    async fn check_and_incr_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> CacheResult<WindowResult>;

    /// Round-trip to the backend for readiness checks.
    async fn ping(&self) -> CacheResult<()>;

    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
