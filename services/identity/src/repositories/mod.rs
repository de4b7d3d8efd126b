//! Repository traits for identity storage.
//!
//! Expected negative outcomes (no row, stale code, nothing to update) are
//! reported as `Option`/`bool`; only infrastructure failures are errors.

use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use uuid::Uuid;

use crate::models::{
    Account, AccountStatus, ActivityType, DeviceSession, Grant, LinkSession, LinkSessionWrite,
    NewAccount, NewDeviceSession, NewOtp, NewToken, Otp, OtpPurpose, OtpSubject, Permission,
    Principal, PrincipalKind, RecordStatus, Role, Section, Token, TokenSide,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub trait AccountRepository: Send + Sync {
    fn create_account(&self, input: NewAccount)
    -> impl Future<Output = DatabaseResult<Account>> + Send;
    /// Soft-deleted accounts are not returned.
    fn find_account(
        &self,
        principal: Principal,
    ) -> impl Future<Output = DatabaseResult<Option<Account>>> + Send;
    /// Match on email or phone.
    fn find_account_by_contact(
        &self,
        kind: PrincipalKind,
        contact: &str,
    ) -> impl Future<Output = DatabaseResult<Option<Account>>> + Send;
    fn update_account_status(
        &self,
        principal: Principal,
        status: AccountStatus,
    ) -> impl Future<Output = DatabaseResult<()>> + Send;
    fn update_password_hash(
        &self,
        principal: Principal,
        password_hash: &str,
    ) -> impl Future<Output = DatabaseResult<()>> + Send;
    fn update_account_role(
        &self,
        principal: Principal,
        role_id: Option<Uuid>,
    ) -> impl Future<Output = DatabaseResult<()>> + Send;
}

pub trait OtpRepository: Send + Sync {
    /// Insert, or overwrite the row already held by `(subject, purpose)`:
    /// new code and expiry, status active, not verified.
    fn upsert_otp(&self, input: NewOtp) -> impl Future<Output = DatabaseResult<Otp>> + Send;
    /// Single conditional update flipping a matching active, unverified,
    /// unexpired row to inactive + verified. Returns whether a row flipped.
    fn consume_otp(
        &self,
        subject: &OtpSubject,
        purpose: OtpPurpose,
        code: u32,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DatabaseResult<bool>> + Send;
    fn find_otp(
        &self,
        subject: &OtpSubject,
        purpose: OtpPurpose,
    ) -> impl Future<Output = DatabaseResult<Option<Otp>>> + Send;
}

pub trait TokenRepository: Send + Sync {
    /// A missing refresh half is stored inactive.
    fn insert_token(&self, input: NewToken) -> impl Future<Output = DatabaseResult<Token>> + Send;
    fn find_token_by_raw(
        &self,
        raw: &str,
        side: TokenSide,
    ) -> impl Future<Output = DatabaseResult<Option<Token>>> + Send;
    fn update_token_status(
        &self,
        token_id: Uuid,
        side: TokenSide,
        status: RecordStatus,
    ) -> impl Future<Output = DatabaseResult<bool>> + Send;
    /// Flip `side` to inactive only if it is still live at `now`. True when
    /// this call was the one that spent it.
    fn spend_token_side(
        &self,
        token_id: Uuid,
        side: TokenSide,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DatabaseResult<bool>> + Send;
    /// Latest token attached to the device row carrying `link_id` for
    /// `activity`.
    fn find_token_by_link(
        &self,
        link_id: Uuid,
        activity: ActivityType,
    ) -> impl Future<Output = DatabaseResult<Option<Token>>> + Send;
    /// Tokens owned by `owner` with at least one live side.
    fn find_live_tokens(
        &self,
        owner: Principal,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DatabaseResult<Vec<Token>>> + Send;
    /// Flip every active side whose expiry has passed to inactive.
    fn expire_stale_tokens(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DatabaseResult<u64>> + Send;
    /// Physically delete rows whose sides are both inactive.
    fn purge_inactive_tokens(&self) -> impl Future<Output = DatabaseResult<u64>> + Send;
}

pub trait DeviceRepository: Send + Sync {
    fn insert_device(
        &self,
        input: NewDeviceSession,
    ) -> impl Future<Output = DatabaseResult<DeviceSession>> + Send;
    fn find_device(
        &self,
        id: Uuid,
    ) -> impl Future<Output = DatabaseResult<Option<DeviceSession>>> + Send;
    /// Mark inactive, stamp `last_active_at`, set activity to logout.
    fn retire_device(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = DatabaseResult<bool>> + Send;
    /// Insert a device row and the token attached to it in one write.
    /// `token.device_id` is replaced by the new row's id.
    fn open_session(
        &self,
        device: NewDeviceSession,
        token: NewToken,
    ) -> impl Future<Output = DatabaseResult<(DeviceSession, Token)>> + Send;
    /// Device row and its pending token are written together.
    fn upsert_link_session(
        &self,
        input: LinkSessionWrite,
    ) -> impl Future<Output = DatabaseResult<LinkSession>> + Send;
}

pub trait RoleRepository: Send + Sync {
    fn create_role(&self, role_name: &str) -> impl Future<Output = DatabaseResult<Role>> + Send;
    fn find_role(&self, id: Uuid) -> impl Future<Output = DatabaseResult<Option<Role>>> + Send;
    fn find_role_by_name(
        &self,
        role_name: &str,
    ) -> impl Future<Output = DatabaseResult<Option<Role>>> + Send;
    fn soft_delete_role(&self, id: Uuid) -> impl Future<Output = DatabaseResult<bool>> + Send;
    fn create_section(
        &self,
        section_name: &str,
    ) -> impl Future<Output = DatabaseResult<Section>> + Send;
    fn find_section_by_name(
        &self,
        section_name: &str,
    ) -> impl Future<Output = DatabaseResult<Option<Section>>> + Send;
    fn create_permission(
        &self,
        permission_name: &str,
    ) -> impl Future<Output = DatabaseResult<Permission>> + Send;
    fn find_permission_by_name(
        &self,
        permission_name: &str,
    ) -> impl Future<Output = DatabaseResult<Option<Permission>>> + Send;
    /// Soft-delete every live junction row of the role, then insert
    /// `(section_id, permission_id)` pairs, atomically.
    fn replace_role_grants(
        &self,
        role_id: Uuid,
        grants: Vec<(Uuid, Uuid)>,
    ) -> impl Future<Output = DatabaseResult<usize>> + Send;
    fn list_role_grants(
        &self,
        role_id: Uuid,
    ) -> impl Future<Output = DatabaseResult<Vec<Grant>>> + Send;
    /// The principal's current role, if its name is in `allowed`.
    fn find_principal_role(
        &self,
        principal: Principal,
        allowed: &[String],
    ) -> impl Future<Output = DatabaseResult<Option<Role>>> + Send;
    /// Whether a live junction row grants any of `permissions`, restricted
    /// to `section` when given.
    fn role_grants_any(
        &self,
        role_id: Uuid,
        section: Option<&str>,
        permissions: &[String],
    ) -> impl Future<Output = DatabaseResult<bool>> + Send;
}

/// Everything the identity flows need from storage.
pub trait IdentityStore:
    AccountRepository
    + OtpRepository
    + TokenRepository
    + DeviceRepository
    + RoleRepository
    + Clone
    + 'static
{
}

impl<T> IdentityStore for T where
    T: AccountRepository
        + OtpRepository
        + TokenRepository
        + DeviceRepository
        + RoleRepository
        + Clone
        + 'static
{
}
