use common::error::DatabaseResult;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::{PgStore, account_table};
use crate::models::{Grant, Permission, Principal, Role, Section};
use crate::repositories::RoleRepository;

fn row_to_role(row: &PgRow) -> DatabaseResult<Role> {
    Ok(Role {
        id: row.try_get("id")?,
        role_name: row.try_get("role_name")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_section(row: &PgRow) -> DatabaseResult<Section> {
    Ok(Section {
        id: row.try_get("id")?,
        section_name: row.try_get("section_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_permission(row: &PgRow) -> DatabaseResult<Permission> {
    Ok(Permission {
        id: row.try_get("id")?,
        permission_name: row.try_get("permission_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl RoleRepository for PgStore {
    async fn create_role(&self, role_name: &str) -> DatabaseResult<Role> {
        let row = sqlx::query(
            r#"
            INSERT INTO roles (id, role_name)
            VALUES ($1, $2)
            RETURNING id, role_name, deleted_at, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(role_name)
        .fetch_one(&self.pool)
        .await?;

        row_to_role(&row)
    }

    async fn find_role(&self, id: Uuid) -> DatabaseResult<Option<Role>> {
        let row = sqlx::query(
            r#"
            SELECT id, role_name, deleted_at, created_at, updated_at
            FROM roles
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_role).transpose()
    }

    async fn find_role_by_name(&self, role_name: &str) -> DatabaseResult<Option<Role>> {
        let row = sqlx::query(
            r#"
            SELECT id, role_name, deleted_at, created_at, updated_at
            FROM roles
            WHERE role_name = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_role).transpose()
    }

    async fn soft_delete_role(&self, id: Uuid) -> DatabaseResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE roles SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE role_section_permissions SET deleted_at = NOW() \
             WHERE role_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_section(&self, section_name: &str) -> DatabaseResult<Section> {
        let row = sqlx::query(
            r#"
            INSERT INTO sections (id, section_name)
            VALUES ($1, $2)
            RETURNING id, section_name, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(section_name)
        .fetch_one(&self.pool)
        .await?;

        row_to_section(&row)
    }

    async fn find_section_by_name(&self, section_name: &str) -> DatabaseResult<Option<Section>> {
        let row = sqlx::query(
            "SELECT id, section_name, created_at, updated_at FROM sections WHERE section_name = $1",
        )
        .bind(section_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_section).transpose()
    }

    async fn create_permission(&self, permission_name: &str) -> DatabaseResult<Permission> {
        let row = sqlx::query(
            r#"
            INSERT INTO permissions (id, permission_name)
            VALUES ($1, $2)
            RETURNING id, permission_name, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(permission_name)
        .fetch_one(&self.pool)
        .await?;

        row_to_permission(&row)
    }

    async fn find_permission_by_name(
        &self,
        permission_name: &str,
    ) -> DatabaseResult<Option<Permission>> {
        let row = sqlx::query(
            "SELECT id, permission_name, created_at, updated_at \
             FROM permissions WHERE permission_name = $1",
        )
        .bind(permission_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_permission).transpose()
    }

    async fn replace_role_grants(
        &self,
        role_id: Uuid,
        grants: Vec<(Uuid, Uuid)>,
    ) -> DatabaseResult<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE role_section_permissions SET deleted_at = NOW() \
             WHERE role_id = $1 AND deleted_at IS NULL",
        )
        .bind(role_id)
        .execute(&mut *tx)
        .await?;

        for (section_id, permission_id) in &grants {
            sqlx::query(
                "INSERT INTO role_section_permissions (id, role_id, section_id, permission_id) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(role_id)
            .bind(section_id)
            .bind(permission_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(grants.len())
    }

    async fn list_role_grants(&self, role_id: Uuid) -> DatabaseResult<Vec<Grant>> {
        let rows = sqlx::query(
            r#"
            SELECT s.section_name, p.permission_name
            FROM role_section_permissions rsp
            JOIN sections s ON s.id = rsp.section_id
            JOIN permissions p ON p.id = rsp.permission_id
            WHERE rsp.role_id = $1 AND rsp.deleted_at IS NULL
            ORDER BY s.section_name, p.permission_name
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> DatabaseResult<Grant> {
                Ok(Grant {
                    section_name: row.try_get("section_name")?,
                    permission_name: row.try_get("permission_name")?,
                })
            })
            .collect()
    }

    async fn find_principal_role(
        &self,
        principal: Principal,
        allowed: &[String],
    ) -> DatabaseResult<Option<Role>> {
        let sql = format!(
            "SELECT r.id, r.role_name, r.deleted_at, r.created_at, r.updated_at \
             FROM roles r JOIN {} a ON a.role_id = r.id \
             WHERE a.id = $1 AND a.deleted_at IS NULL AND r.deleted_at IS NULL \
             AND r.role_name = ANY($2)",
            account_table(principal.kind())
        );
        let row = sqlx::query(&sql)
            .bind(principal.id())
            .bind(allowed)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_role).transpose()
    }

    async fn role_grants_any(
        &self,
        role_id: Uuid,
        section: Option<&str>,
        permissions: &[String],
    ) -> DatabaseResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM role_section_permissions rsp
                JOIN sections s ON s.id = rsp.section_id
                JOIN permissions p ON p.id = rsp.permission_id
                WHERE rsp.role_id = $1
                  AND rsp.deleted_at IS NULL
                  AND ($2::TEXT IS NULL OR s.section_name = $2)
                  AND p.permission_name = ANY($3)
            ) AS granted
            "#,
        )
        .bind(role_id)
        .bind(section)
        .bind(permissions)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("granted")?)
    }
}
