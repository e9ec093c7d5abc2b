use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{CreditRepo, DebitOutcome},
    },
    models::{CapOwner, CapPeriod, ClassAllocation, CreditPool, PeriodCap, PoolRef, SpendCaps},
};

pub struct SqliteCreditRepo {
    pool: SqlitePool,
}

impl SqliteCreditRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Cohort lookup joined in for the pool's owner.
    fn pool_query(pool: &PoolRef) -> &'static str {
        match pool {
            PoolRef::Personal { .. } => {
                r#"
                SELECT p.balance_microcents, p.allocated_microcents, p.allocation_used_microcents,
                       p.updated_at, u.cohort
                FROM credit_pools p
                LEFT JOIN users u ON u.id = p.owner_id
                WHERE p.kind = 'personal' AND p.owner_id = ?
                "#
            }
            PoolRef::Organization { .. } => {
                r#"
                SELECT p.balance_microcents, p.allocated_microcents, p.allocation_used_microcents,
                       p.updated_at, o.cohort
                FROM credit_pools p
                LEFT JOIN organizations o ON o.id = p.owner_id
                WHERE p.kind = 'organization' AND p.owner_id = ?
                "#
            }
            PoolRef::Class { .. } => {
                r#"
                SELECT p.balance_microcents, p.allocated_microcents, p.allocation_used_microcents,
                       p.updated_at, o.cohort
                FROM credit_pools p
                LEFT JOIN classes c ON c.id = p.owner_id
                LEFT JOIN organizations o ON o.id = c.org_id
                WHERE p.kind = 'class' AND p.owner_id = ?
                "#
            }
        }
    }

    fn row_to_pool(pool: &PoolRef, row: &sqlx::sqlite::SqliteRow) -> CreditPool {
        let allocated: Option<i64> = row.get("allocated_microcents");
        let allocation = match pool {
            PoolRef::Class { .. } => allocated.map(|allocated_microcents| ClassAllocation {
                allocated_microcents,
                used_microcents: row.get("allocation_used_microcents"),
            }),
            _ => None,
        };

        CreditPool {
            pool: *pool,
            balance_microcents: row.get("balance_microcents"),
            allocation,
            cohort: row.get("cohort"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_caps(row: &sqlx::sqlite::SqliteRow) -> SpendCaps {
        let read = |period: CapPeriod| -> Option<PeriodCap> {
            let p = period.as_str();
            let limit: Option<i64> = row.get(format!("{p}_limit_microcents").as_str());
            limit.map(|limit_microcents| PeriodCap {
                limit_microcents,
                used_microcents: row.get(format!("{p}_used_microcents").as_str()),
                reset_at: row.get(format!("{p}_reset_at").as_str()),
            })
        };

        SpendCaps {
            daily: read(CapPeriod::Daily),
            weekly: read(CapPeriod::Weekly),
            monthly: read(CapPeriod::Monthly),
        }
    }

    async fn fetch_caps(conn: &mut SqliteConnection, owner_key: &str) -> DbResult<Option<SpendCaps>> {
        let row = sqlx::query(
            r#"
            SELECT daily_limit_microcents, daily_used_microcents, daily_reset_at,
                   weekly_limit_microcents, weekly_used_microcents, weekly_reset_at,
                   monthly_limit_microcents, monthly_used_microcents, monthly_reset_at
            FROM spend_caps
            WHERE owner_key = ?
            "#,
        )
        .bind(owner_key)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(Self::row_to_caps))
    }

    async fn write_caps(
        conn: &mut SqliteConnection,
        owner_key: &str,
        caps: &SpendCaps,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let limit = |p: CapPeriod| caps.get(p).map(|c| c.limit_microcents);
        let used = |p: CapPeriod| caps.get(p).map_or(0, |c| c.used_microcents);
        let reset = |p: CapPeriod| caps.get(p).and_then(|c| c.reset_at);

        sqlx::query(
            r#"
            INSERT INTO spend_caps (
                owner_key,
                daily_limit_microcents, daily_used_microcents, daily_reset_at,
                weekly_limit_microcents, weekly_used_microcents, weekly_reset_at,
                monthly_limit_microcents, monthly_used_microcents, monthly_reset_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner_key) DO UPDATE SET
                daily_limit_microcents = excluded.daily_limit_microcents,
                daily_used_microcents = excluded.daily_used_microcents,
                daily_reset_at = excluded.daily_reset_at,
                weekly_limit_microcents = excluded.weekly_limit_microcents,
                weekly_used_microcents = excluded.weekly_used_microcents,
                weekly_reset_at = excluded.weekly_reset_at,
                monthly_limit_microcents = excluded.monthly_limit_microcents,
                monthly_used_microcents = excluded.monthly_used_microcents,
                monthly_reset_at = excluded.monthly_reset_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner_key)
        .bind(limit(CapPeriod::Daily))
        .bind(used(CapPeriod::Daily))
        .bind(reset(CapPeriod::Daily))
        .bind(limit(CapPeriod::Weekly))
        .bind(used(CapPeriod::Weekly))
        .bind(reset(CapPeriod::Weekly))
        .bind(limit(CapPeriod::Monthly))
        .bind(used(CapPeriod::Monthly))
        .bind(reset(CapPeriod::Monthly))
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CreditRepo for SqliteCreditRepo {
    async fn get_pool(&self, pool: &PoolRef) -> DbResult<Option<CreditPool>> {
        let row = sqlx::query(Self::pool_query(pool))
            .bind(pool.owner_id().to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Self::row_to_pool(pool, &row)))
    }

    async fn set_balance(&self, pool: &PoolRef, balance_microcents: i64) -> DbResult<CreditPool> {
        if balance_microcents < 0 {
            return Err(DbError::Validation(
                "Pool balance cannot be negative".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO credit_pools (kind, owner_id, balance_microcents, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (kind, owner_id) DO UPDATE SET
                balance_microcents = excluded.balance_microcents,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(pool.kind().as_str())
        .bind(pool.owner_id().to_string())
        .bind(balance_microcents)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.get_pool(pool).await?.ok_or(DbError::NotFound)
    }

    async fn set_allocation(&self, pool: &PoolRef, allocated_microcents: i64) -> DbResult<()> {
        if !matches!(pool, PoolRef::Class { .. }) {
            return Err(DbError::Validation(
                "Only class pools have an allocation".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE credit_pools
            SET allocated_microcents = ?, updated_at = ?
            WHERE kind = 'class' AND owner_id = ?
            "#,
        )
        .bind(allocated_microcents)
        .bind(Utc::now())
        .bind(pool.owner_id().to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn get_caps(&self, owner: &CapOwner) -> DbResult<Option<SpendCaps>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_caps(&mut *conn, &owner.key()).await
    }

    async fn set_caps(&self, owner: &CapOwner, caps: &SpendCaps) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::write_caps(&mut *conn, &owner.key(), caps, Utc::now()).await
    }

    async fn debit(
        &self,
        pool: &PoolRef,
        cap_owner: Option<&CapOwner>,
        amount_microcents: i64,
        now: DateTime<Utc>,
    ) -> DbResult<DebitOutcome> {
        if amount_microcents < 0 {
            return Err(DbError::Validation(
                "Debit amount cannot be negative".to_string(),
            ));
        }

        let allocation_delta = match pool {
            PoolRef::Class { .. } => amount_microcents,
            _ => 0,
        };

        let mut tx = self.pool.begin().await?;

        // The balance guard makes the check and the decrement one statement.
        let row = sqlx::query(
            r#"
            UPDATE credit_pools
            SET balance_microcents = balance_microcents - ?,
                allocation_used_microcents = allocation_used_microcents + ?,
                updated_at = ?
            WHERE kind = ? AND owner_id = ? AND balance_microcents >= ?
            RETURNING balance_microcents
            "#,
        )
        .bind(amount_microcents)
        .bind(allocation_delta)
        .bind(now)
        .bind(pool.kind().as_str())
        .bind(pool.owner_id().to_string())
        .bind(amount_microcents)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let exists = sqlx::query("SELECT 1 FROM credit_pools WHERE kind = ? AND owner_id = ?")
                .bind(pool.kind().as_str())
                .bind(pool.owner_id().to_string())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            return Err(if exists {
                DbError::Conflict("Insufficient balance for debit".to_string())
            } else {
                DbError::NotFound
            });
        };
        let remaining_balance_microcents: i64 = row.get("balance_microcents");

        if let Some(owner) = cap_owner {
            let key = owner.key();
            if let Some(mut caps) = Self::fetch_caps(&mut *tx, &key).await? {
                caps.record_spend(amount_microcents, now);
                Self::write_caps(&mut *tx, &key, &caps, now).await?;
            }
        }

        tx.commit().await?;

        Ok(DebitOutcome {
            remaining_balance_microcents,
        })
    }
}
