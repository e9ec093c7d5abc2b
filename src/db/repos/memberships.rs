use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{Class, ClassMembership, CreateClass, CreateOrganization, OrgMembership, OrgRole, Organization},
};

/// Organizations, classes and who belongs to them.
#[async_trait]
pub trait MembershipRepo: Send + Sync {
    async fn create_organization(&self, input: CreateOrganization) -> DbResult<Organization>;
    async fn get_organization(&self, id: Uuid) -> DbResult<Option<Organization>>;
    async fn create_class(&self, input: CreateClass) -> DbResult<Class>;

    /// Add or update an organization membership.
    async fn upsert_org_membership(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
        active: bool,
    ) -> DbResult<OrgMembership>;

    /// Add or update a class membership.
    async fn upsert_class_membership(
        &self,
        class_id: Uuid,
        user_id: Uuid,
        active: bool,
    ) -> DbResult<ClassMembership>;

    /// The user's active organization memberships, oldest first.
    async fn list_active_org_memberships(&self, user_id: Uuid) -> DbResult<Vec<OrgMembership>>;

    /// The user's membership in a class, active or not.
    async fn get_class_membership(
        &self,
        class_id: Uuid,
        user_id: Uuid,
    ) -> DbResult<Option<ClassMembership>>;
}
