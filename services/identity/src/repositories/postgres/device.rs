use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::token::{TOKEN_COLUMNS, insert_token_with, row_to_token};
use super::{PgStore, owner_column, owner_from_row, parse_column};
use crate::models::{
    ActivityType, DeviceSession, LinkSession, LinkSessionWrite, NewDeviceSession, NewToken,
    RecordStatus, Token,
};
use crate::repositories::DeviceRepository;

const DEVICE_COLUMNS: &str = "id, user_id, admin_id, device_id, device_type, device_name, \
    ip_address, app_version, timezone, activity_type, is_active, last_active_at, registered_at, \
    link_id, created_at, updated_at";

fn row_to_device(row: &PgRow) -> DatabaseResult<DeviceSession> {
    Ok(DeviceSession {
        id: row.try_get("id")?,
        owner: owner_from_row(row)?,
        device_id: row.try_get("device_id")?,
        device_type: row.try_get("device_type")?,
        device_name: row.try_get("device_name")?,
        ip_address: row.try_get("ip_address")?,
        app_version: row.try_get("app_version")?,
        timezone: row.try_get("timezone")?,
        activity_type: parse_column(row, "activity_type")?,
        is_active: row.try_get("is_active")?,
        last_active_at: row.try_get("last_active_at")?,
        registered_at: row.try_get("registered_at")?,
        link_id: row.try_get("link_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn insert_device_with<'e, E>(
    executor: E,
    input: NewDeviceSession,
) -> DatabaseResult<DeviceSession>
where
    E: sqlx::PgExecutor<'e>,
{
    let (user_id, admin_id) = input.owner.columns();
    let sql = format!(
        "INSERT INTO device_sessions (id, user_id, admin_id, device_id, device_type, device_name, \
         ip_address, app_version, timezone, activity_type, is_active, link_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {DEVICE_COLUMNS}"
    );
    let meta = &input.metadata;
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(admin_id)
        .bind(&meta.device_id)
        .bind(&meta.device_type)
        .bind(&meta.device_name)
        .bind(&meta.ip_address)
        .bind(&meta.app_version)
        .bind(&meta.timezone)
        .bind(input.activity_type.as_str())
        .bind(input.is_active)
        .bind(input.link_id)
        .fetch_one(executor)
        .await?;

    row_to_device(&row)
}

impl DeviceRepository for PgStore {
    async fn insert_device(&self, input: NewDeviceSession) -> DatabaseResult<DeviceSession> {
        insert_device_with(&self.pool, input).await
    }

    async fn find_device(&self, id: Uuid) -> DatabaseResult<Option<DeviceSession>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM device_sessions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_device).transpose()
    }

    async fn retire_device(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE device_sessions
            SET is_active = FALSE, last_active_at = $2, activity_type = $3, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(ActivityType::Logout.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn open_session(
        &self,
        device: NewDeviceSession,
        mut token: NewToken,
    ) -> DatabaseResult<(DeviceSession, Token)> {
        let mut tx = self.pool.begin().await?;
        let device = insert_device_with(&mut *tx, device).await?;
        token.device_id = Some(device.id);
        let token = insert_token_with(&mut *tx, token).await?;
        tx.commit().await?;
        Ok((device, token))
    }

    async fn upsert_link_session(&self, input: LinkSessionWrite) -> DatabaseResult<LinkSession> {
        let mut tx = self.pool.begin().await?;
        let meta = &input.metadata;

        let update = format!(
            "UPDATE device_sessions SET link_id = $4, device_id = $5, device_name = $6, \
             ip_address = $7, app_version = $8, timezone = $9, is_active = TRUE, \
             last_active_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                SELECT id FROM device_sessions \
                WHERE {} = $1 AND device_type IS NOT DISTINCT FROM $2 AND activity_type = $3 \
                ORDER BY created_at DESC LIMIT 1 FOR UPDATE) \
             RETURNING {DEVICE_COLUMNS}",
            owner_column(input.owner)
        );
        let existing = sqlx::query(&update)
            .bind(input.owner.id())
            .bind(&meta.device_type)
            .bind(input.activity_type.as_str())
            .bind(input.link_id)
            .bind(&meta.device_id)
            .bind(&meta.device_name)
            .bind(&meta.ip_address)
            .bind(&meta.app_version)
            .bind(&meta.timezone)
            .fetch_optional(&mut *tx)
            .await?;

        let (device, created) = match existing {
            Some(row) => (row_to_device(&row)?, false),
            None => {
                let device = insert_device_with(
                    &mut *tx,
                    NewDeviceSession {
                        owner: input.owner,
                        metadata: input.metadata.clone(),
                        activity_type: input.activity_type,
                        is_active: true,
                        link_id: Some(input.link_id),
                    },
                )
                .await?;
                (device, true)
            }
        };

        let refreshed = if created {
            None
        } else {
            let refresh = format!(
                "UPDATE tokens SET kind = $2, access_token = $3, access_token_expiry = $4, \
                 access_token_status = $5, updated_at = NOW() \
                 WHERE id = ( \
                    SELECT id FROM tokens WHERE device_id = $1 \
                    ORDER BY updated_at DESC LIMIT 1 FOR UPDATE) \
                 RETURNING {TOKEN_COLUMNS}"
            );
            sqlx::query(&refresh)
                .bind(device.id)
                .bind(input.token_kind.as_str())
                .bind(&input.access_token)
                .bind(input.access_token_expiry)
                .bind(RecordStatus::Active.as_str())
                .fetch_optional(&mut *tx)
                .await?
        };

        let token = match refreshed {
            Some(row) => row_to_token(&row)?,
            None => {
                insert_token_with(
                    &mut *tx,
                    NewToken {
                        owner: input.owner,
                        device_id: Some(device.id),
                        kind: input.token_kind,
                        access_token: input.access_token.clone(),
                        access_token_expiry: input.access_token_expiry,
                        refresh_token: None,
                        refresh_token_expiry: None,
                    },
                )
                .await?
            }
        };

        tx.commit().await?;
        Ok(LinkSession {
            device,
            token,
            created,
        })
    }
}
