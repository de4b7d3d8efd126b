use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::Row;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::Postgres;
use uuid::Uuid;

use super::{PgStore, parse_column};
use crate::models::{NewOtp, Otp, OtpPurpose, OtpSubject, Principal, PrincipalKind, RecordStatus};
use crate::repositories::OtpRepository;

const OTP_COLUMNS: &str = "id, user_id, admin_id, pending_kind, code, purpose, email, phone, \
                           country_code, is_verified, status, expire_at, created_at, updated_at";

/// Predicate selecting the rows of `subject`; always bound as `$1`.
///
/// The pending kind is inlined from a closed enum, so the contact stays
/// the only bound value.
fn subject_clause(subject: &OtpSubject) -> String {
    match subject {
        OtpSubject::Principal(Principal::User(_)) => "user_id = $1".to_string(),
        OtpSubject::Principal(Principal::Admin(_)) => "admin_id = $1".to_string(),
        OtpSubject::PendingContact { kind, .. } => format!(
            "user_id IS NULL AND admin_id IS NULL AND pending_kind = '{}' \
             AND COALESCE(email, phone) = $1",
            kind.as_str()
        ),
    }
}

/// Arbiter for `ON CONFLICT`, matching the partial unique indexes on `otps`.
fn conflict_target(subject: &OtpSubject) -> &'static str {
    match subject {
        OtpSubject::Principal(Principal::User(_)) => "(user_id, purpose) WHERE user_id IS NOT NULL",
        OtpSubject::Principal(Principal::Admin(_)) => {
            "(admin_id, purpose) WHERE admin_id IS NOT NULL"
        }
        OtpSubject::PendingContact { .. } => {
            "(purpose, pending_kind, (COALESCE(email, phone))) \
             WHERE user_id IS NULL AND admin_id IS NULL"
        }
    }
}

fn bind_subject<'q>(
    query: Query<'q, Postgres, PgArguments>,
    subject: &'q OtpSubject,
) -> Query<'q, Postgres, PgArguments> {
    match subject {
        OtpSubject::Principal(p) => query.bind(p.id()),
        OtpSubject::PendingContact { contact, .. } => query.bind(contact.as_str()),
    }
}

fn row_to_otp(row: &PgRow) -> DatabaseResult<Otp> {
    let user_id = row.try_get("user_id")?;
    let admin_id = row.try_get("admin_id")?;
    let code: i32 = row.try_get("code")?;
    Ok(Otp {
        id: row.try_get("id")?,
        owner: Principal::from_columns(user_id, admin_id),
        pending_kind: row
            .try_get::<Option<String>, _>("pending_kind")?
            .map(|raw| raw.parse::<PrincipalKind>())
            .transpose()
            .map_err(DatabaseError::Decode)?,
        code: code as u32,
        purpose: parse_column(row, "purpose")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        country_code: row.try_get("country_code")?,
        is_verified: row.try_get("is_verified")?,
        status: parse_column(row, "status")?,
        expire_at: row.try_get("expire_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl OtpRepository for PgStore {
    async fn upsert_otp(&self, input: NewOtp) -> DatabaseResult<Otp> {
        // A single statement so concurrent issuers converge on one row.
        let (user_id, admin_id) = input
            .subject
            .owner()
            .map(|p| p.columns())
            .unwrap_or((None, None));
        let sql = format!(
            "INSERT INTO otps (id, user_id, admin_id, pending_kind, code, purpose, email, phone, \
             country_code, is_verified, status, expire_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10, $11) \
             ON CONFLICT {} DO UPDATE SET code = EXCLUDED.code, email = EXCLUDED.email, \
             phone = EXCLUDED.phone, country_code = EXCLUDED.country_code, is_verified = FALSE, \
             status = EXCLUDED.status, expire_at = EXCLUDED.expire_at, updated_at = NOW() \
             RETURNING {OTP_COLUMNS}",
            conflict_target(&input.subject)
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(admin_id)
            .bind(input.subject.pending_kind().map(|k| k.as_str()))
            .bind(input.code as i32)
            .bind(input.purpose.as_str())
            .bind(input.contact.email())
            .bind(input.contact.phone())
            .bind(input.contact.country_code())
            .bind(RecordStatus::Active.as_str())
            .bind(input.expire_at)
            .fetch_one(&self.pool)
            .await?;

        row_to_otp(&row)
    }

    async fn consume_otp(
        &self,
        subject: &OtpSubject,
        purpose: OtpPurpose,
        code: u32,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        // One conditional statement; a concurrent second attempt sees the
        // flipped row and matches nothing.
        let sql = format!(
            "UPDATE otps SET is_verified = TRUE, status = 'inactive', updated_at = $3 \
             WHERE {} AND code = $2 AND status = 'active' AND is_verified = FALSE \
             AND expire_at > $3 AND purpose = $4 RETURNING id",
            subject_clause(subject)
        );
        let consumed = bind_subject(sqlx::query(&sql), subject)
            .bind(code as i32)
            .bind(now)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(consumed.is_some())
    }

    async fn find_otp(
        &self,
        subject: &OtpSubject,
        purpose: OtpPurpose,
    ) -> DatabaseResult<Option<Otp>> {
        let sql = format!(
            "SELECT {OTP_COLUMNS} FROM otps WHERE {} AND purpose = $2 \
             ORDER BY updated_at DESC LIMIT 1",
            subject_clause(subject)
        );
        let row = bind_subject(sqlx::query(&sql), subject)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_otp).transpose()
    }
}
