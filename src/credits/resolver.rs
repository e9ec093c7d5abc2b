use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::{CreditError, SpendContext};
use crate::{
    db::repos::{CreditRepo, MembershipRepo, UserRepo},
    models::{CapOwner, ClassAllocation, CreditPool, OrgRole, PoolRef, SpendCaps, User},
};

/// Limits layered on top of the pool balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicableCaps {
    pub periodic: SpendCaps,
    /// Class allocation ceiling, class pools only
    pub allocation: Option<ClassAllocation>,
    /// False when the class membership exists but is no longer active
    pub class_member: bool,
}

/// The single pool a request is charged against, fixed at request start.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSpend {
    pub pool: CreditPool,
    pub caps: ApplicableCaps,
    /// Owner of the periodic caps, advanced on settlement
    pub cap_owner: CapOwner,
}

impl ResolvedSpend {
    pub fn pool_ref(&self) -> &PoolRef {
        &self.pool.pool
    }
}

/// Picks the authoritative pool for a request.
///
/// Priority is class context, then student organization membership, then
/// the personal pool. Every call reads the ledger afresh.
#[derive(Clone)]
pub struct CreditResolver {
    users: Arc<dyn UserRepo>,
    memberships: Arc<dyn MembershipRepo>,
    credits: Arc<dyn CreditRepo>,
}

impl CreditResolver {
    pub fn new(
        users: Arc<dyn UserRepo>,
        memberships: Arc<dyn MembershipRepo>,
        credits: Arc<dyn CreditRepo>,
    ) -> Self {
        Self {
            users,
            memberships,
            credits,
        }
    }

    #[tracing::instrument(skip(self), fields(pool = tracing::field::Empty))]
    pub async fn resolve(
        &self,
        user_id: Uuid,
        context: SpendContext,
    ) -> Result<ResolvedSpend, CreditError> {
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or(CreditError::UserNotFound(user_id))?;

        let resolved = match context {
            SpendContext::Class(class_id) => self.resolve_class(&user, class_id).await?,
            SpendContext::Auto => self.resolve_auto(&user).await?,
        };

        tracing::Span::current().record("pool", resolved.pool.kind().as_str());
        Ok(resolved)
    }

    async fn resolve_class(
        &self,
        user: &User,
        class_id: Uuid,
    ) -> Result<ResolvedSpend, CreditError> {
        // With no membership row there is no class pool to resolve. A
        // lapsed membership still resolves; `can_spend` denies it after the
        // cap and allocation checks.
        let membership = self
            .memberships
            .get_class_membership(class_id, user.id)
            .await?
            .ok_or(CreditError::NotClassMember(class_id))?;

        let pool_ref = PoolRef::Class {
            org_id: membership.org_id,
            class_id,
        };
        let cap_owner = CapOwner::ClassMember {
            class_id,
            user_id: user.id,
        };
        let pool = self.load_pool(pool_ref, None).await?;
        let periodic = self.load_caps(&cap_owner).await?;

        Ok(ResolvedSpend {
            caps: ApplicableCaps {
                periodic,
                allocation: pool.allocation,
                class_member: membership.active,
            },
            pool,
            cap_owner,
        })
    }

    async fn resolve_auto(&self, user: &User) -> Result<ResolvedSpend, CreditError> {
        let student_membership = self
            .memberships
            .list_active_org_memberships(user.id)
            .await?
            .into_iter()
            .find(|m| m.role == OrgRole::Student);

        let (pool_ref, cap_owner, fallback_cohort) = match student_membership {
            Some(membership) => (
                PoolRef::Organization {
                    org_id: membership.org_id,
                },
                CapOwner::OrgMember {
                    org_id: membership.org_id,
                    user_id: user.id,
                },
                None,
            ),
            None => (
                PoolRef::Personal { user_id: user.id },
                CapOwner::User { user_id: user.id },
                user.cohort.clone(),
            ),
        };

        let pool = self.load_pool(pool_ref, fallback_cohort).await?;
        let periodic = self.load_caps(&cap_owner).await?;

        Ok(ResolvedSpend {
            pool,
            caps: ApplicableCaps {
                periodic,
                allocation: None,
                class_member: true,
            },
            cap_owner,
        })
    }

    /// A pool that was never provisioned behaves as an empty one.
    async fn load_pool(
        &self,
        pool_ref: PoolRef,
        fallback_cohort: Option<String>,
    ) -> Result<CreditPool, CreditError> {
        Ok(self
            .credits
            .get_pool(&pool_ref)
            .await?
            .unwrap_or_else(|| CreditPool {
                pool: pool_ref,
                balance_microcents: 0,
                allocation: None,
                cohort: fallback_cohort,
                updated_at: Utc::now(),
            }))
    }

    async fn load_caps(&self, owner: &CapOwner) -> Result<SpendCaps, CreditError> {
        Ok(self.credits.get_caps(owner).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{DbPool, tests::create_test_db},
        models::{CreateClass, CreateOrganization, CreateUser, PeriodCap, PoolKind},
    };

    struct Fixture {
        resolver: CreditResolver,
    }

    async fn fixture() -> (Fixture, DbPool) {
        let db = create_test_db().await;
        let resolver = CreditResolver::new(db.users(), db.memberships(), db.credits());
        (Fixture { resolver }, db)
    }

    async fn user(db: &DbPool) -> Uuid {
        db.users().create(CreateUser::default()).await.unwrap().id
    }

    async fn org(db: &DbPool) -> Uuid {
        db.memberships()
            .create_organization(CreateOrganization {
                name: "School".into(),
                cohort: Some("education".into()),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_independent_user_resolves_personal() {
        let (f, db) = fixture().await;
        let user_id = user(&db).await;
        db.credits()
            .set_balance(&PoolRef::Personal { user_id }, 1_000)
            .await
            .unwrap();

        let resolved = f.resolver.resolve(user_id, SpendContext::Auto).await.unwrap();
        assert_eq!(resolved.pool.kind(), PoolKind::Personal);
        assert_eq!(resolved.pool.balance_microcents, 1_000);
        assert_eq!(resolved.cap_owner, CapOwner::User { user_id });
    }

    #[tokio::test]
    async fn test_student_resolves_organization_pool_with_membership_caps() {
        let (f, db) = fixture().await;
        let user_id = user(&db).await;
        let org_id = org(&db).await;
        db.memberships()
            .upsert_org_membership(org_id, user_id, OrgRole::Student, true)
            .await
            .unwrap();
        db.credits()
            .set_balance(&PoolRef::Organization { org_id }, 50_000)
            .await
            .unwrap();
        let owner = CapOwner::OrgMember { org_id, user_id };
        let caps = SpendCaps {
            daily: Some(PeriodCap::new(10_000)),
            ..Default::default()
        };
        db.credits().set_caps(&owner, &caps).await.unwrap();

        let resolved = f.resolver.resolve(user_id, SpendContext::Auto).await.unwrap();
        assert_eq!(resolved.pool.pool, PoolRef::Organization { org_id });
        assert_eq!(resolved.pool.cohort.as_deref(), Some("education"));
        assert_eq!(resolved.caps.periodic, caps);
        assert_eq!(resolved.cap_owner, owner);
    }

    #[tokio::test]
    async fn test_trainer_falls_back_to_personal() {
        let (f, db) = fixture().await;
        let user_id = user(&db).await;
        let org_id = org(&db).await;
        db.memberships()
            .upsert_org_membership(org_id, user_id, OrgRole::Trainer, true)
            .await
            .unwrap();

        let resolved = f.resolver.resolve(user_id, SpendContext::Auto).await.unwrap();
        assert_eq!(resolved.pool.kind(), PoolKind::Personal);
        assert_eq!(resolved.pool.balance_microcents, 0);
    }

    #[tokio::test]
    async fn test_class_context_requires_active_membership() {
        let (f, db) = fixture().await;
        let user_id = user(&db).await;
        let org_id = org(&db).await;
        let class_id = db
            .memberships()
            .create_class(CreateClass {
                org_id,
                name: "Art".into(),
            })
            .await
            .unwrap()
            .id;

        let err = f
            .resolver
            .resolve(user_id, SpendContext::Class(class_id))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::NotClassMember(id) if id == class_id));

        db.memberships()
            .upsert_class_membership(class_id, user_id, false)
            .await
            .unwrap();
        let resolved = f
            .resolver
            .resolve(user_id, SpendContext::Class(class_id))
            .await
            .unwrap();
        assert_eq!(resolved.pool.pool, PoolRef::Class { org_id, class_id });
        assert!(!resolved.caps.class_member);
        assert_eq!(
            crate::credits::can_spend(&resolved.pool, &resolved.caps, 0, Utc::now()),
            crate::credits::SpendDecision::Denied(crate::credits::SpendDenial::NotClassMember)
        );

        db.memberships()
            .upsert_class_membership(class_id, user_id, true)
            .await
            .unwrap();
        let resolved = f
            .resolver
            .resolve(user_id, SpendContext::Class(class_id))
            .await
            .unwrap();
        assert!(resolved.caps.class_member);
    }

    #[tokio::test]
    async fn test_class_context_overrides_organization_membership() {
        let (f, db) = fixture().await;
        let user_id = user(&db).await;
        let org_id = org(&db).await;
        let class_id = db
            .memberships()
            .create_class(CreateClass {
                org_id,
                name: "Art".into(),
            })
            .await
            .unwrap()
            .id;
        db.memberships()
            .upsert_org_membership(org_id, user_id, OrgRole::Student, true)
            .await
            .unwrap();
        db.memberships()
            .upsert_class_membership(class_id, user_id, true)
            .await
            .unwrap();
        let pool = PoolRef::Class { org_id, class_id };
        db.credits().set_balance(&pool, 100_000).await.unwrap();
        db.credits().set_allocation(&pool, 40_000).await.unwrap();

        let resolved = f
            .resolver
            .resolve(user_id, SpendContext::Class(class_id))
            .await
            .unwrap();
        assert_eq!(resolved.pool.pool, pool);
        assert_eq!(
            resolved.caps.allocation.map(|a| a.remaining()),
            Some(40_000)
        );
        assert_eq!(
            resolved.cap_owner,
            CapOwner::ClassMember { class_id, user_id }
        );
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let (f, db) = fixture().await;
        let user_id = user(&db).await;
        let org_id = org(&db).await;
        db.memberships()
            .upsert_org_membership(org_id, user_id, OrgRole::Student, true)
            .await
            .unwrap();

        let first = f.resolver.resolve(user_id, SpendContext::Auto).await.unwrap();
        let second = f.resolver.resolve(user_id, SpendContext::Auto).await.unwrap();
        assert_eq!(first.pool.pool, second.pool.pool);
        assert_eq!(first.caps, second.caps);
        assert_eq!(first.cap_owner, second.cap_owner);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (f, _db) = fixture().await;
        let missing = Uuid::new_v4();
        let err = f.resolver.resolve(missing, SpendContext::Auto).await.unwrap_err();
        assert!(matches!(err, CreditError::UserNotFound(id) if id == missing));
    }
}
