//! Shared tests for MembershipRepo implementations

use uuid::Uuid;

use super::RepoTestContext;
use crate::{
    db::error::DbError,
    models::{CreateClass, OrgRole},
};

pub async fn test_upsert_org_membership_updates_role(ctx: &RepoTestContext<'_>) {
    let user = ctx.create_user().await;
    let org = ctx.create_org("School").await;

    ctx.memberships
        .upsert_org_membership(org, user, OrgRole::Student, true)
        .await
        .expect("Failed to add member");
    let updated = ctx
        .memberships
        .upsert_org_membership(org, user, OrgRole::Trainer, true)
        .await
        .expect("Failed to update member");

    assert_eq!(updated.role, OrgRole::Trainer);
    let active = ctx
        .memberships
        .list_active_org_memberships(user)
        .await
        .expect("Query failed");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].role, OrgRole::Trainer);
}

pub async fn test_inactive_memberships_are_not_listed(ctx: &RepoTestContext<'_>) {
    let user = ctx.create_user().await;
    let org = ctx.create_org("School").await;

    ctx.memberships
        .upsert_org_membership(org, user, OrgRole::Student, false)
        .await
        .expect("Failed to add member");

    let active = ctx
        .memberships
        .list_active_org_memberships(user)
        .await
        .expect("Query failed");
    assert!(active.is_empty());
}

pub async fn test_active_memberships_are_oldest_first(ctx: &RepoTestContext<'_>) {
    let user = ctx.create_user().await;
    let first = ctx.create_org("First").await;
    let second = ctx.create_org("Second").await;

    ctx.add_student(first, user).await;
    ctx.add_student(second, user).await;

    let active = ctx
        .memberships
        .list_active_org_memberships(user)
        .await
        .expect("Query failed");
    let orgs: Vec<Uuid> = active.iter().map(|m| m.org_id).collect();
    assert_eq!(orgs, vec![first, second]);
}

pub async fn test_class_membership_carries_org(ctx: &RepoTestContext<'_>) {
    let user = ctx.create_user().await;
    let org = ctx.create_org("School").await;
    let class = ctx.create_class(org, "Biology").await;

    ctx.memberships
        .upsert_class_membership(class, user, true)
        .await
        .expect("Failed to add class member");

    let membership = ctx
        .memberships
        .get_class_membership(class, user)
        .await
        .expect("Query failed")
        .expect("Membership should exist");
    assert_eq!(membership.org_id, org);
    assert!(membership.active);

    let other = ctx.create_user().await;
    assert!(
        ctx.memberships
            .get_class_membership(class, other)
            .await
            .expect("Query failed")
            .is_none()
    );
}

pub async fn test_create_class_unknown_org(ctx: &RepoTestContext<'_>) {
    let result = ctx
        .memberships
        .create_class(CreateClass {
            org_id: Uuid::new_v4(),
            name: "Orphan".to_string(),
        })
        .await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

mod sqlite_tests {
    use crate::db::tests::sqlite_test;

    sqlite_test!(test_upsert_org_membership_updates_role);
    sqlite_test!(test_inactive_memberships_are_not_listed);
    sqlite_test!(test_active_memberships_are_oldest_first);
    sqlite_test!(test_class_membership_carries_org);
    sqlite_test!(test_create_class_unknown_org);
}
