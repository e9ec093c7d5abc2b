//! Shared database repository test infrastructure
//!
//! Each repository has a test module containing shared test functions that
//! take a [`RepoTestContext`] of `&dyn XxxRepo` handles, plus a `sqlite_test!`
//! macro that runs each function against a fresh in-memory database.
//!
//! ```bash
//! cargo test db::tests
//! ```

mod conversations;
pub mod harness;
mod memberships;
mod model_pricing;

use uuid::Uuid;

use crate::{
    db::{
        repos::{
            ConversationRepo, CreditRepo, MembershipRepo, ModelPricingRepo, SupervisionRepo,
            UsageRepo, UserRepo,
        },
        sqlite::{
            SqliteConversationRepo, SqliteCreditRepo, SqliteMembershipRepo,
            SqliteModelPricingRepo, SqliteSupervisionRepo, SqliteUsageRepo, SqliteUserRepo,
        },
    },
    models::{CreateClass, CreateOrganization, CreateUser, OrgRole},
};

/// Every repository over one database
pub struct RepoTestContext<'a> {
    pub users: &'a dyn UserRepo,
    pub memberships: &'a dyn MembershipRepo,
    pub credits: &'a dyn CreditRepo,
    pub supervision: &'a dyn SupervisionRepo,
    pub conversations: &'a dyn ConversationRepo,
    pub usage: &'a dyn UsageRepo,
    pub model_pricing: &'a dyn ModelPricingRepo,
}

impl RepoTestContext<'_> {
    pub async fn create_user(&self) -> Uuid {
        self.users
            .create(CreateUser::default())
            .await
            .expect("Failed to create test user")
            .id
    }

    pub async fn create_org(&self, name: &str) -> Uuid {
        self.memberships
            .create_organization(CreateOrganization {
                name: name.to_string(),
                cohort: None,
            })
            .await
            .expect("Failed to create test org")
            .id
    }

    pub async fn create_class(&self, org_id: Uuid, name: &str) -> Uuid {
        self.memberships
            .create_class(CreateClass {
                org_id,
                name: name.to_string(),
            })
            .await
            .expect("Failed to create test class")
            .id
    }

    pub async fn add_student(&self, org_id: Uuid, user_id: Uuid) {
        self.memberships
            .upsert_org_membership(org_id, user_id, OrgRole::Student, true)
            .await
            .expect("Failed to add org member");
    }
}

/// Owns the SQLite repositories a [`RepoTestContext`] borrows
pub struct SqliteRepos {
    users: SqliteUserRepo,
    memberships: SqliteMembershipRepo,
    credits: SqliteCreditRepo,
    supervision: SqliteSupervisionRepo,
    conversations: SqliteConversationRepo,
    usage: SqliteUsageRepo,
    model_pricing: SqliteModelPricingRepo,
}

impl SqliteRepos {
    pub async fn create() -> Self {
        let pool = harness::create_sqlite_pool().await;
        harness::run_sqlite_migrations(&pool).await;
        Self {
            users: SqliteUserRepo::new(pool.clone()),
            memberships: SqliteMembershipRepo::new(pool.clone()),
            credits: SqliteCreditRepo::new(pool.clone()),
            supervision: SqliteSupervisionRepo::new(pool.clone()),
            conversations: SqliteConversationRepo::new(pool.clone()),
            usage: SqliteUsageRepo::new(pool.clone()),
            model_pricing: SqliteModelPricingRepo::new(pool),
        }
    }

    pub fn context(&self) -> RepoTestContext<'_> {
        RepoTestContext {
            users: &self.users,
            memberships: &self.memberships,
            credits: &self.credits,
            supervision: &self.supervision,
            conversations: &self.conversations,
            usage: &self.usage,
            model_pricing: &self.model_pricing,
        }
    }
}

/// A migrated in-memory database behind the production [`DbPool`]
pub async fn create_test_db() -> crate::db::DbPool {
    let pool = harness::create_sqlite_pool().await;
    harness::run_sqlite_migrations(&pool).await;
    crate::db::DbPool::from_sqlite(pool)
}

/// Run a shared test function against a fresh in-memory SQLite database
macro_rules! sqlite_test {
    ($name:ident) => {
        #[tokio::test]
        async fn $name() {
            let repos = $crate::db::tests::SqliteRepos::create().await;
            super::$name(&repos.context()).await;
        }
    };
}
pub(crate) use sqlite_test;
