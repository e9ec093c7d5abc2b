mod error;
pub mod repos;
pub mod sqlite;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    users: Arc<dyn UserRepo>,
    memberships: Arc<dyn MembershipRepo>,
    credits: Arc<dyn CreditRepo>,
    supervision: Arc<dyn SupervisionRepo>,
    conversations: Arc<dyn ConversationRepo>,
    usage: Arc<dyn UsageRepo>,
    model_pricing: Arc<dyn ModelPricingRepo>,
}

/// Database pool.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    pool: sqlx::SqlitePool,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            users: Arc::new(sqlite::SqliteUserRepo::new(pool.clone())),
            memberships: Arc::new(sqlite::SqliteMembershipRepo::new(pool.clone())),
            credits: Arc::new(sqlite::SqliteCreditRepo::new(pool.clone())),
            supervision: Arc::new(sqlite::SqliteSupervisionRepo::new(pool.clone())),
            conversations: Arc::new(sqlite::SqliteConversationRepo::new(pool.clone())),
            usage: Arc::new(sqlite::SqliteUsageRepo::new(pool.clone())),
            model_pricing: Arc::new(sqlite::SqliteModelPricingRepo::new(pool.clone())),
        };
        DbPool { pool, repos }
    }

    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .foreign_keys(true)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                Ok(Self::from_sqlite(pool))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner
    /// This automatically creates and manages a _sqlx_migrations table
    pub async fn run_migrations(&self) -> DbResult<()> {
        tracing::info!("Running SQLite migrations");
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        tracing::info!("SQLite migrations completed successfully");
        Ok(())
    }

    /// Round-trip to the database for readiness checks.
    pub async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn sqlite(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    pub fn users(&self) -> Arc<dyn UserRepo> {
        Arc::clone(&self.repos.users)
    }

    pub fn memberships(&self) -> Arc<dyn MembershipRepo> {
        Arc::clone(&self.repos.memberships)
    }

    pub fn credits(&self) -> Arc<dyn CreditRepo> {
        Arc::clone(&self.repos.credits)
    }

    pub fn supervision(&self) -> Arc<dyn SupervisionRepo> {
        Arc::clone(&self.repos.supervision)
    }

    pub fn conversations(&self) -> Arc<dyn ConversationRepo> {
        Arc::clone(&self.repos.conversations)
    }

    pub fn usage(&self) -> Arc<dyn UsageRepo> {
        Arc::clone(&self.repos.usage)
    }

    pub fn model_pricing(&self) -> Arc<dyn ModelPricingRepo> {
        Arc::clone(&self.repos.model_pricing)
    }
}
