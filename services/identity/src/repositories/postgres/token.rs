use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};
use uuid::Uuid;

use super::{PgStore, owner_column, owner_from_row, parse_column};
use crate::models::{ActivityType, NewToken, Principal, RecordStatus, Token, TokenSide};
use crate::repositories::TokenRepository;

pub(super) const TOKEN_COLUMNS: &str = "id, user_id, admin_id, device_id, kind, access_token, \
    refresh_token, access_token_status, refresh_token_status, access_token_expiry, \
    refresh_token_expiry, created_at, updated_at";

fn side_columns(side: TokenSide) -> (&'static str, &'static str) {
    match side {
        TokenSide::Access => ("access_token", "access_token_status"),
        TokenSide::Refresh => ("refresh_token", "refresh_token_status"),
    }
}

fn expiry_column(side: TokenSide) -> &'static str {
    match side {
        TokenSide::Access => "access_token_expiry",
        TokenSide::Refresh => "refresh_token_expiry",
    }
}

pub(super) fn row_to_token(row: &PgRow) -> DatabaseResult<Token> {
    Ok(Token {
        id: row.try_get("id")?,
        owner: owner_from_row(row)?,
        device_id: row.try_get("device_id")?,
        kind: parse_column(row, "kind")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        access_token_status: parse_column(row, "access_token_status")?,
        refresh_token_status: parse_column(row, "refresh_token_status")?,
        access_token_expiry: row.try_get("access_token_expiry")?,
        refresh_token_expiry: row.try_get("refresh_token_expiry")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert on any executor so link-session writes can share a transaction.
pub(super) async fn insert_token_with<'e, E>(executor: E, input: NewToken) -> DatabaseResult<Token>
where
    E: PgExecutor<'e>,
{
    let (user_id, admin_id) = input.owner.columns();
    let refresh_status = if input.refresh_token.is_some() {
        RecordStatus::Active
    } else {
        RecordStatus::Inactive
    };

    let sql = format!(
        "INSERT INTO tokens (id, user_id, admin_id, device_id, kind, access_token, refresh_token, \
         access_token_status, refresh_token_status, access_token_expiry, refresh_token_expiry) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {TOKEN_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(admin_id)
        .bind(input.device_id)
        .bind(input.kind.as_str())
        .bind(&input.access_token)
        .bind(&input.refresh_token)
        .bind(RecordStatus::Active.as_str())
        .bind(refresh_status.as_str())
        .bind(input.access_token_expiry)
        .bind(input.refresh_token_expiry)
        .fetch_one(executor)
        .await?;

    row_to_token(&row)
}

impl TokenRepository for PgStore {
    async fn insert_token(&self, input: NewToken) -> DatabaseResult<Token> {
        insert_token_with(&self.pool, input).await
    }

    async fn find_token_by_raw(&self, raw: &str, side: TokenSide) -> DatabaseResult<Option<Token>> {
        let (column, _) = side_columns(side);
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE {column} = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(raw)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_token).transpose()
    }

    async fn update_token_status(
        &self,
        token_id: Uuid,
        side: TokenSide,
        status: RecordStatus,
    ) -> DatabaseResult<bool> {
        let (_, status_column) = side_columns(side);
        let sql =
            format!("UPDATE tokens SET {status_column} = $2, updated_at = NOW() WHERE id = $1");
        let result = sqlx::query(&sql)
            .bind(token_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn spend_token_side(
        &self,
        token_id: Uuid,
        side: TokenSide,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let (column, status_column) = side_columns(side);
        let expiry_column = expiry_column(side);
        let sql = format!(
            "UPDATE tokens SET {status_column} = 'inactive', updated_at = $2 \
             WHERE id = $1 AND {column} IS NOT NULL AND {status_column} = 'active' \
             AND {expiry_column} > $2"
        );
        let result = sqlx::query(&sql)
            .bind(token_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_token_by_link(
        &self,
        link_id: Uuid,
        activity: ActivityType,
    ) -> DatabaseResult<Option<Token>> {
        let sql = format!(
            "SELECT {} FROM tokens t \
             JOIN device_sessions d ON d.id = t.device_id \
             WHERE d.link_id = $1 AND d.activity_type = $2 \
             ORDER BY t.updated_at DESC LIMIT 1",
            prefixed_columns("t")
        );
        let row = sqlx::query(&sql)
            .bind(link_id)
            .bind(activity.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_token).transpose()
    }

    async fn find_live_tokens(
        &self,
        owner: Principal,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<Token>> {
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE {} = $1 AND ( \
               (access_token_status = 'active' AND access_token_expiry > $2) \
               OR (refresh_token IS NOT NULL AND refresh_token_status = 'active' \
                   AND refresh_token_expiry > $2))",
            owner_column(owner)
        );
        let rows = sqlx::query(&sql)
            .bind(owner.id())
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_token).collect()
    }

    async fn expire_stale_tokens(&self, now: DateTime<Utc>) -> DatabaseResult<u64> {
        // Only ever tightens a status, so it is safe next to live traffic.
        let result = sqlx::query(
            r#"
            UPDATE tokens SET
                access_token_status = CASE
                    WHEN access_token_status = 'active' AND access_token_expiry <= $1
                    THEN 'inactive' ELSE access_token_status END,
                refresh_token_status = CASE
                    WHEN refresh_token_status = 'active'
                         AND (refresh_token_expiry IS NULL OR refresh_token_expiry <= $1)
                    THEN 'inactive' ELSE refresh_token_status END,
                updated_at = $1
            WHERE (access_token_status = 'active' AND access_token_expiry <= $1)
               OR (refresh_token_status = 'active'
                   AND (refresh_token_expiry IS NULL OR refresh_token_expiry <= $1))
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_inactive_tokens(&self) -> DatabaseResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tokens
            WHERE access_token_status = 'inactive' AND refresh_token_status = 'inactive'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// `TOKEN_COLUMNS` qualified with a table alias.
pub(super) fn prefixed_columns(alias: &str) -> String {
    TOKEN_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
