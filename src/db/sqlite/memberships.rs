use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::{parse_enum, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::MembershipRepo,
    },
    models::{
        Class, ClassMembership, CreateClass, CreateOrganization, OrgMembership, OrgRole,
        Organization,
    },
};

pub struct SqliteMembershipRepo {
    pool: SqlitePool,
}

impl SqliteMembershipRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_org_membership(row: &sqlx::sqlite::SqliteRow) -> DbResult<OrgMembership> {
        Ok(OrgMembership {
            org_id: parse_uuid(&row.get::<String, _>("org_id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            role: parse_enum(&row.get::<String, _>("role"))?,
            active: row.get("active"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl MembershipRepo for SqliteMembershipRepo {
    async fn create_organization(&self, input: CreateOrganization) -> DbResult<Organization> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, cohort, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.name)
        .bind(&input.cohort)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Organization {
            id,
            name: input.name,
            cohort: input.cohort,
            created_at: now,
        })
    }

    async fn get_organization(&self, id: Uuid) -> DbResult<Option<Organization>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, cohort, created_at
            FROM organizations
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Organization {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                name: row.get("name"),
                cohort: row.get("cohort"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    async fn create_class(&self, input: CreateClass) -> DbResult<Class> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO classes (id, org_id, name, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(input.org_id.to_string())
        .bind(&input.name)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                DbError::NotFound
            }
            _ => DbError::from(e),
        })?;

        Ok(Class {
            id,
            org_id: input.org_id,
            name: input.name,
            created_at: now,
        })
    }

    async fn upsert_org_membership(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
        active: bool,
    ) -> DbResult<OrgMembership> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO org_memberships (org_id, user_id, role, active, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (org_id, user_id) DO UPDATE SET
                role = excluded.role,
                active = excluded.active
            "#,
        )
        .bind(org_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT org_id, user_id, role, active, created_at
            FROM org_memberships
            WHERE org_id = ? AND user_id = ?
            "#,
        )
        .bind(org_id.to_string())
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_org_membership(&row)
    }

    async fn upsert_class_membership(
        &self,
        class_id: Uuid,
        user_id: Uuid,
        active: bool,
    ) -> DbResult<ClassMembership> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO class_memberships (class_id, user_id, active, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (class_id, user_id) DO UPDATE SET active = excluded.active
            "#,
        )
        .bind(class_id.to_string())
        .bind(user_id.to_string())
        .bind(active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_class_membership(class_id, user_id)
            .await?
            .ok_or(DbError::NotFound)
    }

    async fn list_active_org_memberships(&self, user_id: Uuid) -> DbResult<Vec<OrgMembership>> {
        let rows = sqlx::query(
            r#"
            SELECT org_id, user_id, role, active, created_at
            FROM org_memberships
            WHERE user_id = ? AND active = 1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_org_membership).collect()
    }

    async fn get_class_membership(
        &self,
        class_id: Uuid,
        user_id: Uuid,
    ) -> DbResult<Option<ClassMembership>> {
        let row = sqlx::query(
            r#"
            SELECT cm.class_id, c.org_id, cm.user_id, cm.active, cm.created_at
            FROM class_memberships cm
            JOIN classes c ON c.id = cm.class_id
            WHERE cm.class_id = ? AND cm.user_id = ?
            "#,
        )
        .bind(class_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ClassMembership {
                class_id: parse_uuid(&row.get::<String, _>("class_id"))?,
                org_id: parse_uuid(&row.get::<String, _>("org_id"))?,
                user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
                active: row.get("active"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }
}
