//! PostgreSQL implementation of the identity repositories

use std::str::FromStr;

use common::error::{DatabaseError, DatabaseResult};
use sqlx::PgPool;
use tracing::info;

use crate::models::{Principal, PrincipalKind};

mod account;
mod device;
mod otp;
mod role;
mod token;

/// Repository backed by a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over an initialised pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn run_migrations(&self) -> DatabaseResult<()> {
        info!("Applying identity schema migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}

/// Table holding accounts of `kind`.
pub(crate) fn account_table(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::User => "users",
        PrincipalKind::Admin => "admins",
    }
}

/// Foreign-key column pointing at `principal`.
pub(crate) fn owner_column(principal: Principal) -> &'static str {
    match principal {
        Principal::User(_) => "user_id",
        Principal::Admin(_) => "admin_id",
    }
}

/// Rebuild the owner of a row from its two nullable foreign keys.
pub(crate) fn owner_from_row(row: &sqlx::postgres::PgRow) -> DatabaseResult<Principal> {
    use sqlx::Row;

    let user_id = row.try_get("user_id")?;
    let admin_id = row.try_get("admin_id")?;
    Principal::from_columns(user_id, admin_id)
        .ok_or_else(|| DatabaseError::Decode("row must have exactly one owner".into()))
}

/// Parse a text column into one of the model enums.
pub(crate) fn parse_column<T>(row: &sqlx::postgres::PgRow, column: &str) -> DatabaseResult<T>
where
    T: FromStr<Err = String>,
{
    use sqlx::Row;

    let raw: String = row.try_get(column)?;
    raw.parse().map_err(DatabaseError::Decode)
}
