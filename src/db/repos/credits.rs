use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{CapOwner, CreditPool, PoolRef, SpendCaps},
};

/// Result of a successful debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebitOutcome {
    pub remaining_balance_microcents: i64,
}

/// The credit ledger: pool balances and periodic caps.
#[async_trait]
pub trait CreditRepo: Send + Sync {
    /// Read a pool, including its owner's pricing cohort.
    async fn get_pool(&self, pool: &PoolRef) -> DbResult<Option<CreditPool>>;

    /// Create a pool or overwrite its balance (top-ups are external; this
    /// exists for provisioning).
    async fn set_balance(&self, pool: &PoolRef, balance_microcents: i64) -> DbResult<CreditPool>;

    /// Set the allocation ceiling of a class pool.
    async fn set_allocation(&self, pool: &PoolRef, allocated_microcents: i64) -> DbResult<()>;

    async fn get_caps(&self, owner: &CapOwner) -> DbResult<Option<SpendCaps>>;

    /// Replace the caps row for an owner.
    async fn set_caps(&self, owner: &CapOwner, caps: &SpendCaps) -> DbResult<()>;

    /// Atomically debit a pool.
    ///
    /// In one transaction: decrement the balance only if it stays `>= 0`,
    /// advance the class allocation usage, and advance the owner's caps with
    /// lazy window rollover. Returns `DbError::Conflict` without changing
    /// anything when the balance cannot absorb `amount_microcents`.
    async fn debit(
        &self,
        pool: &PoolRef,
        cap_owner: Option<&CapOwner>,
        amount_microcents: i64,
        now: DateTime<Utc>,
    ) -> DbResult<DebitOutcome>;
}
