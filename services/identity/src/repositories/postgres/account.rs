use common::error::DatabaseResult;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::{PgStore, account_table, parse_column};
use crate::models::{Account, AccountStatus, NewAccount, Principal, PrincipalKind};
use crate::repositories::AccountRepository;

const ACCOUNT_COLUMNS: &str = "id, email, phone, country_code, password_hash, status, role_id, \
                               deleted_at, created_at, updated_at";

fn row_to_account(row: &PgRow, kind: PrincipalKind) -> DatabaseResult<Account> {
    Ok(Account {
        principal: Principal::new(kind, row.try_get("id")?),
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        country_code: row.try_get("country_code")?,
        password_hash: row.try_get("password_hash")?,
        status: parse_column(row, "status")?,
        role_id: row.try_get("role_id")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl AccountRepository for PgStore {
    async fn create_account(&self, input: NewAccount) -> DatabaseResult<Account> {
        let sql = format!(
            "INSERT INTO {} (id, email, phone, country_code, password_hash, status, role_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {ACCOUNT_COLUMNS}",
            account_table(input.kind)
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&input.email)
            .bind(&input.phone)
            .bind(&input.country_code)
            .bind(&input.password_hash)
            .bind(AccountStatus::Unverified.as_str())
            .bind(input.role_id)
            .fetch_one(&self.pool)
            .await?;

        row_to_account(&row, input.kind)
    }

    async fn find_account(&self, principal: Principal) -> DatabaseResult<Option<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {} WHERE id = $1 AND deleted_at IS NULL",
            account_table(principal.kind())
        );
        let row = sqlx::query(&sql)
            .bind(principal.id())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_account(&row, principal.kind()))
            .transpose()
    }

    async fn find_account_by_contact(
        &self,
        kind: PrincipalKind,
        contact: &str,
    ) -> DatabaseResult<Option<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {} \
             WHERE (email = $1 OR phone = $1) AND deleted_at IS NULL",
            account_table(kind)
        );
        let row = sqlx::query(&sql)
            .bind(contact)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_account(&row, kind)).transpose()
    }

    async fn update_account_status(
        &self,
        principal: Principal,
        status: AccountStatus,
    ) -> DatabaseResult<()> {
        let sql = format!(
            "UPDATE {} SET status = $2, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
            account_table(principal.kind())
        );
        sqlx::query(&sql)
            .bind(principal.id())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password_hash(
        &self,
        principal: Principal,
        password_hash: &str,
    ) -> DatabaseResult<()> {
        let sql = format!(
            "UPDATE {} SET password_hash = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
            account_table(principal.kind())
        );
        sqlx::query(&sql)
            .bind(principal.id())
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_account_role(
        &self,
        principal: Principal,
        role_id: Option<Uuid>,
    ) -> DatabaseResult<()> {
        let sql = format!(
            "UPDATE {} SET role_id = $2, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
            account_table(principal.kind())
        );
        sqlx::query(&sql)
            .bind(principal.id())
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
