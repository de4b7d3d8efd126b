//! In-process store with the same semantics as [`super::PgStore`].
//!
//! Every operation runs under one async mutex, which gives the
//! conditional updates (OTP consume, link-session upsert, grant
//! replacement) the same all-or-nothing behaviour as a transaction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountRepository, DeviceRepository, OtpRepository, RoleRepository, TokenRepository,
};
use crate::models::{
    Account, AccountStatus, ActivityType, DeviceSession, Grant, LinkSession, LinkSessionWrite,
    NewAccount, NewDeviceSession, NewOtp, NewToken, Otp, OtpPurpose, OtpSubject, Permission,
    Principal, PrincipalKind, RecordStatus, RequestMetadata, Role, RoleSectionPermission, Section,
    Token, TokenSide,
};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Principal, Account>,
    otps: HashMap<Uuid, Otp>,
    tokens: HashMap<Uuid, Token>,
    devices: HashMap<Uuid, DeviceSession>,
    roles: HashMap<Uuid, Role>,
    sections: HashMap<Uuid, Section>,
    permissions: HashMap<Uuid, Permission>,
    grants: Vec<RoleSectionPermission>,
}

impl MemoryState {
    fn account_mut(&mut self, principal: Principal) -> Option<&mut Account> {
        self.accounts
            .get_mut(&principal)
            .filter(|a| a.deleted_at.is_none())
    }

    fn new_device(
        owner: Principal,
        metadata: RequestMetadata,
        activity_type: ActivityType,
        is_active: bool,
        link_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> DeviceSession {
        DeviceSession {
            id: Uuid::new_v4(),
            owner,
            device_id: metadata.device_id,
            device_type: metadata.device_type,
            device_name: metadata.device_name,
            ip_address: metadata.ip_address,
            app_version: metadata.app_version,
            timezone: metadata.timezone,
            activity_type,
            is_active,
            last_active_at: now,
            registered_at: now,
            link_id,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_token(input: NewToken, now: DateTime<Utc>) -> Token {
        let refresh_token_status = if input.refresh_token.is_some() {
            RecordStatus::Active
        } else {
            RecordStatus::Inactive
        };
        Token {
            id: Uuid::new_v4(),
            owner: input.owner,
            device_id: input.device_id,
            kind: input.kind,
            access_token: input.access_token,
            refresh_token: input.refresh_token,
            access_token_status: RecordStatus::Active,
            refresh_token_status,
            access_token_expiry: input.access_token_expiry,
            refresh_token_expiry: input.refresh_token_expiry,
            created_at: now,
            updated_at: now,
        }
    }

    fn latest_token_for_device(&mut self, device_id: Uuid) -> Option<&mut Token> {
        self.tokens
            .values_mut()
            .filter(|t| t.device_id == Some(device_id))
            .max_by_key(|t| t.updated_at)
    }
}

/// Shared in-memory store; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of token rows currently held.
    pub async fn token_count(&self) -> usize {
        self.state.lock().await.tokens.len()
    }

    /// Every device row owned by `owner`, oldest first.
    pub async fn devices_for(&self, owner: Principal) -> Vec<DeviceSession> {
        let state = self.state.lock().await;
        let mut devices: Vec<_> = state
            .devices
            .values()
            .filter(|d| d.owner == owner)
            .cloned()
            .collect();
        devices.sort_by_key(|d| d.created_at);
        devices
    }

    /// Every OTP row held for `subject`.
    pub async fn otps_for(&self, subject: &OtpSubject) -> Vec<Otp> {
        let state = self.state.lock().await;
        state
            .otps
            .values()
            .filter(|o| o.belongs_to(subject))
            .cloned()
            .collect()
    }
}

impl AccountRepository for MemoryStore {
    async fn create_account(&self, input: NewAccount) -> DatabaseResult<Account> {
        let mut state = self.state.lock().await;
        let taken = state.accounts.values().any(|a| {
            a.deleted_at.is_none()
                && a.principal.kind() == input.kind
                && ((input.email.is_some() && a.email == input.email)
                    || (input.phone.is_some() && a.phone == input.phone))
        });
        if taken {
            return Err(DatabaseError::UniqueViolation(format!(
                "{}_contact_key",
                input.kind.as_str()
            )));
        }

        let now = Utc::now();
        let account = Account {
            principal: Principal::new(input.kind, Uuid::new_v4()),
            email: input.email,
            phone: input.phone,
            country_code: input.country_code,
            password_hash: input.password_hash,
            status: AccountStatus::Unverified,
            role_id: input.role_id,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        state.accounts.insert(account.principal, account.clone());
        Ok(account)
    }

    async fn find_account(&self, principal: Principal) -> DatabaseResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(&principal)
            .filter(|a| a.deleted_at.is_none())
            .cloned())
    }

    async fn find_account_by_contact(
        &self,
        kind: PrincipalKind,
        contact: &str,
    ) -> DatabaseResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| {
                a.deleted_at.is_none()
                    && a.principal.kind() == kind
                    && (a.email.as_deref() == Some(contact) || a.phone.as_deref() == Some(contact))
            })
            .cloned())
    }

    async fn update_account_status(
        &self,
        principal: Principal,
        status: AccountStatus,
    ) -> DatabaseResult<()> {
        let mut state = self.state.lock().await;
        if let Some(account) = state.account_mut(principal) {
            account.status = status;
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_password_hash(
        &self,
        principal: Principal,
        password_hash: &str,
    ) -> DatabaseResult<()> {
        let mut state = self.state.lock().await;
        if let Some(account) = state.account_mut(principal) {
            account.password_hash = password_hash.to_string();
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_account_role(
        &self,
        principal: Principal,
        role_id: Option<Uuid>,
    ) -> DatabaseResult<()> {
        let mut state = self.state.lock().await;
        if let Some(account) = state.account_mut(principal) {
            account.role_id = role_id;
            account.updated_at = Utc::now();
        }
        Ok(())
    }
}

impl OtpRepository for MemoryStore {
    async fn upsert_otp(&self, input: NewOtp) -> DatabaseResult<Otp> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let existing = state
            .otps
            .values_mut()
            .find(|o| o.purpose == input.purpose && o.belongs_to(&input.subject));

        if let Some(otp) = existing {
            otp.code = input.code;
            otp.email = input.contact.email().map(str::to_string);
            otp.phone = input.contact.phone().map(str::to_string);
            otp.country_code = input.contact.country_code().map(str::to_string);
            otp.is_verified = false;
            otp.status = RecordStatus::Active;
            otp.expire_at = input.expire_at;
            otp.updated_at = now;
            return Ok(otp.clone());
        }

        let otp = Otp {
            id: Uuid::new_v4(),
            owner: input.subject.owner(),
            pending_kind: input.subject.pending_kind(),
            code: input.code,
            purpose: input.purpose,
            email: input.contact.email().map(str::to_string),
            phone: input.contact.phone().map(str::to_string),
            country_code: input.contact.country_code().map(str::to_string),
            is_verified: false,
            status: RecordStatus::Active,
            expire_at: input.expire_at,
            created_at: now,
            updated_at: now,
        };
        state.otps.insert(otp.id, otp.clone());
        Ok(otp)
    }

    async fn consume_otp(
        &self,
        subject: &OtpSubject,
        purpose: OtpPurpose,
        code: u32,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let mut state = self.state.lock().await;
        let Some(otp) = state
            .otps
            .values_mut()
            .find(|o| o.purpose == purpose && o.belongs_to(subject) && o.accepts(code, now))
        else {
            return Ok(false);
        };

        otp.is_verified = true;
        otp.status = RecordStatus::Inactive;
        otp.updated_at = now;
        Ok(true)
    }

    async fn find_otp(
        &self,
        subject: &OtpSubject,
        purpose: OtpPurpose,
    ) -> DatabaseResult<Option<Otp>> {
        let state = self.state.lock().await;
        Ok(state
            .otps
            .values()
            .find(|o| o.purpose == purpose && o.belongs_to(subject))
            .cloned())
    }
}

impl TokenRepository for MemoryStore {
    async fn insert_token(&self, input: NewToken) -> DatabaseResult<Token> {
        let mut state = self.state.lock().await;
        let token = MemoryState::new_token(input, Utc::now());
        state.tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_token_by_raw(&self, raw: &str, side: TokenSide) -> DatabaseResult<Option<Token>> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .values()
            .find(|t| t.raw(side) == Some(raw))
            .cloned())
    }

    async fn update_token_status(
        &self,
        token_id: Uuid,
        side: TokenSide,
        status: RecordStatus,
    ) -> DatabaseResult<bool> {
        let mut state = self.state.lock().await;
        let Some(token) = state.tokens.get_mut(&token_id) else {
            return Ok(false);
        };
        token.set_status(side, status);
        token.updated_at = Utc::now();
        Ok(true)
    }

    async fn spend_token_side(
        &self,
        token_id: Uuid,
        side: TokenSide,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let mut state = self.state.lock().await;
        let Some(token) = state.tokens.get_mut(&token_id) else {
            return Ok(false);
        };
        if !token.is_live(side, now) {
            return Ok(false);
        }
        token.set_status(side, RecordStatus::Inactive);
        token.updated_at = now;
        Ok(true)
    }

    async fn find_token_by_link(
        &self,
        link_id: Uuid,
        activity: ActivityType,
    ) -> DatabaseResult<Option<Token>> {
        let mut state = self.state.lock().await;
        let Some(device_id) = state
            .devices
            .values()
            .find(|d| d.link_id == Some(link_id) && d.activity_type == activity)
            .map(|d| d.id)
        else {
            return Ok(None);
        };
        Ok(state.latest_token_for_device(device_id).cloned())
    }

    async fn find_live_tokens(
        &self,
        owner: Principal,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<Token>> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .values()
            .filter(|t| t.owner == owner && t.any_live(now))
            .cloned()
            .collect())
    }

    async fn expire_stale_tokens(&self, now: DateTime<Utc>) -> DatabaseResult<u64> {
        let mut state = self.state.lock().await;
        let mut flipped = 0;
        for token in state.tokens.values_mut() {
            let mut touched = false;
            for side in [TokenSide::Access, TokenSide::Refresh] {
                let stale = token.status(side) == RecordStatus::Active
                    && token.expiry(side).is_none_or(|exp| exp <= now);
                if stale {
                    token.set_status(side, RecordStatus::Inactive);
                    touched = true;
                }
            }
            if touched {
                token.updated_at = now;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn purge_inactive_tokens(&self) -> DatabaseResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state.tokens.retain(|_, t| !t.fully_inactive());
        Ok((before - state.tokens.len()) as u64)
    }
}

impl DeviceRepository for MemoryStore {
    async fn insert_device(&self, input: NewDeviceSession) -> DatabaseResult<DeviceSession> {
        let mut state = self.state.lock().await;
        let device = MemoryState::new_device(
            input.owner,
            input.metadata,
            input.activity_type,
            input.is_active,
            input.link_id,
            Utc::now(),
        );
        state.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn find_device(&self, id: Uuid) -> DatabaseResult<Option<DeviceSession>> {
        let state = self.state.lock().await;
        Ok(state.devices.get(&id).cloned())
    }

    async fn retire_device(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let mut state = self.state.lock().await;
        let Some(device) = state.devices.get_mut(&id) else {
            return Ok(false);
        };
        device.is_active = false;
        device.last_active_at = now;
        device.activity_type = ActivityType::Logout;
        device.updated_at = now;
        Ok(true)
    }

    async fn open_session(
        &self,
        device: NewDeviceSession,
        mut token: NewToken,
    ) -> DatabaseResult<(DeviceSession, Token)> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let device = MemoryState::new_device(
            device.owner,
            device.metadata,
            device.activity_type,
            device.is_active,
            device.link_id,
            now,
        );
        token.device_id = Some(device.id);
        let token = MemoryState::new_token(token, now);
        state.devices.insert(device.id, device.clone());
        state.tokens.insert(token.id, token.clone());
        Ok((device, token))
    }

    async fn upsert_link_session(&self, input: LinkSessionWrite) -> DatabaseResult<LinkSession> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let existing = state
            .devices
            .values_mut()
            .find(|d| {
                d.owner == input.owner
                    && d.device_type == input.metadata.device_type
                    && d.activity_type == input.activity_type
            })
            .map(|device| {
                device.link_id = Some(input.link_id);
                device.device_id = input.metadata.device_id.clone();
                device.device_name = input.metadata.device_name.clone();
                device.ip_address = input.metadata.ip_address.clone();
                device.app_version = input.metadata.app_version.clone();
                device.timezone = input.metadata.timezone.clone();
                device.is_active = true;
                device.last_active_at = now;
                device.updated_at = now;
                device.clone()
            });

        let created = existing.is_none();
        let device = match existing {
            Some(device) => device,
            None => {
                let device = MemoryState::new_device(
                    input.owner,
                    input.metadata,
                    input.activity_type,
                    true,
                    Some(input.link_id),
                    now,
                );
                state.devices.insert(device.id, device.clone());
                device
            }
        };

        let refreshed = if created {
            None
        } else {
            state.latest_token_for_device(device.id).map(|token| {
                token.kind = input.token_kind;
                token.access_token = input.access_token.clone();
                token.access_token_expiry = input.access_token_expiry;
                token.access_token_status = RecordStatus::Active;
                token.updated_at = now;
                token.clone()
            })
        };

        let token = match refreshed {
            Some(token) => token,
            None => {
                let token = MemoryState::new_token(
                    NewToken {
                        owner: input.owner,
                        device_id: Some(device.id),
                        kind: input.token_kind,
                        access_token: input.access_token,
                        access_token_expiry: input.access_token_expiry,
                        refresh_token: None,
                        refresh_token_expiry: None,
                    },
                    now,
                );
                state.tokens.insert(token.id, token.clone());
                token
            }
        };

        Ok(LinkSession {
            device,
            token,
            created,
        })
    }
}

impl RoleRepository for MemoryStore {
    async fn create_role(&self, role_name: &str) -> DatabaseResult<Role> {
        let mut state = self.state.lock().await;
        if state
            .roles
            .values()
            .any(|r| r.deleted_at.is_none() && r.role_name == role_name)
        {
            return Err(DatabaseError::UniqueViolation("roles_role_name_key".into()));
        }
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            role_name: role_name.to_string(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn find_role(&self, id: Uuid) -> DatabaseResult<Option<Role>> {
        let state = self.state.lock().await;
        Ok(state
            .roles
            .get(&id)
            .filter(|r| r.deleted_at.is_none())
            .cloned())
    }

    async fn find_role_by_name(&self, role_name: &str) -> DatabaseResult<Option<Role>> {
        let state = self.state.lock().await;
        Ok(state
            .roles
            .values()
            .find(|r| r.deleted_at.is_none() && r.role_name == role_name)
            .cloned())
    }

    async fn soft_delete_role(&self, id: Uuid) -> DatabaseResult<bool> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(role) = state.roles.get_mut(&id).filter(|r| r.deleted_at.is_none()) else {
            return Ok(false);
        };
        role.deleted_at = Some(now);
        role.updated_at = now;
        for grant in state.grants.iter_mut().filter(|g| g.role_id == id) {
            grant.deleted_at.get_or_insert(now);
        }
        Ok(true)
    }

    async fn create_section(&self, section_name: &str) -> DatabaseResult<Section> {
        let mut state = self.state.lock().await;
        if state
            .sections
            .values()
            .any(|s| s.section_name == section_name)
        {
            return Err(DatabaseError::UniqueViolation(
                "sections_section_name_key".into(),
            ));
        }
        let now = Utc::now();
        let section = Section {
            id: Uuid::new_v4(),
            section_name: section_name.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.sections.insert(section.id, section.clone());
        Ok(section)
    }

    async fn find_section_by_name(&self, section_name: &str) -> DatabaseResult<Option<Section>> {
        let state = self.state.lock().await;
        Ok(state
            .sections
            .values()
            .find(|s| s.section_name == section_name)
            .cloned())
    }

    async fn create_permission(&self, permission_name: &str) -> DatabaseResult<Permission> {
        let mut state = self.state.lock().await;
        if state
            .permissions
            .values()
            .any(|p| p.permission_name == permission_name)
        {
            return Err(DatabaseError::UniqueViolation(
                "permissions_permission_name_key".into(),
            ));
        }
        let now = Utc::now();
        let permission = Permission {
            id: Uuid::new_v4(),
            permission_name: permission_name.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_permission_by_name(
        &self,
        permission_name: &str,
    ) -> DatabaseResult<Option<Permission>> {
        let state = self.state.lock().await;
        Ok(state
            .permissions
            .values()
            .find(|p| p.permission_name == permission_name)
            .cloned())
    }

    async fn replace_role_grants(
        &self,
        role_id: Uuid,
        grants: Vec<(Uuid, Uuid)>,
    ) -> DatabaseResult<usize> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        for grant in state
            .grants
            .iter_mut()
            .filter(|g| g.role_id == role_id && g.deleted_at.is_none())
        {
            grant.deleted_at = Some(now);
        }

        let inserted = grants.len();
        state
            .grants
            .extend(grants.into_iter().map(|(section_id, permission_id)| {
                RoleSectionPermission {
                    id: Uuid::new_v4(),
                    role_id,
                    section_id,
                    permission_id,
                    deleted_at: None,
                    created_at: now,
                }
            }));
        Ok(inserted)
    }

    async fn list_role_grants(&self, role_id: Uuid) -> DatabaseResult<Vec<Grant>> {
        let state = self.state.lock().await;
        let mut grants: Vec<Grant> = state
            .grants
            .iter()
            .filter(|g| g.role_id == role_id && g.deleted_at.is_none())
            .filter_map(|g| {
                let section = state.sections.get(&g.section_id)?;
                let permission = state.permissions.get(&g.permission_id)?;
                Some(Grant {
                    section_name: section.section_name.clone(),
                    permission_name: permission.permission_name.clone(),
                })
            })
            .collect();
        grants.sort();
        Ok(grants)
    }

    async fn find_principal_role(
        &self,
        principal: Principal,
        allowed: &[String],
    ) -> DatabaseResult<Option<Role>> {
        let state = self.state.lock().await;
        let role = state
            .accounts
            .get(&principal)
            .filter(|a| a.deleted_at.is_none())
            .and_then(|a| a.role_id)
            .and_then(|role_id| state.roles.get(&role_id))
            .filter(|r| r.deleted_at.is_none() && allowed.contains(&r.role_name))
            .cloned();
        Ok(role)
    }

    async fn role_grants_any(
        &self,
        role_id: Uuid,
        section: Option<&str>,
        permissions: &[String],
    ) -> DatabaseResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .grants
            .iter()
            .filter(|g| g.role_id == role_id && g.deleted_at.is_none())
            .any(|g| {
                let section_ok = match section {
                    Some(name) => state
                        .sections
                        .get(&g.section_id)
                        .is_some_and(|s| s.section_name == name),
                    None => true,
                };
                section_ok
                    && state
                        .permissions
                        .get(&g.permission_id)
                        .is_some_and(|p| permissions.contains(&p.permission_name))
            }))
    }
}
