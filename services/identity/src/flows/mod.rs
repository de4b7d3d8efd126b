//! Identity flows
//!
//! The only place that knows the business sequence of signup, login,
//! password reset, refresh and logout. Everything else is a primitive
//! composed here.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::config::{IdentitySettings, OtpMode};
use crate::error::{IdentityError, IdentityResult};
use crate::jwt::{JwtService, TokenType};
use crate::ledger::TokenLedger;
use crate::models::{
    Account, ActivityType, Contact, LinkSessionWrite, NewToken, OtpPurpose, OtpSubject, Principal,
    RequestMetadata, TokenKind,
};
use crate::notifier::{Notification, NotificationKind, Notifier};
use crate::otp::OtpManager;
use crate::repositories::IdentityStore;
use crate::roles::RoleAdmin;
use crate::session::SessionTracker;

mod login;
mod password;
mod signup;
mod tokens;

pub use login::{LoginInput, LoginOutput, VerifyLoginInput};
pub use password::{ForgotPasswordInput, ForgotPasswordOutput, ResetPasswordInput};
pub use signup::{SignupInput, SignupOutput, VerifySignupInput};
pub use tokens::{RefreshInput, TokenPair};

/// Policy knobs the flows are built with
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub otp_mode: OtpMode,
    pub otp_ttl_secs: i64,
    pub multi_device_login: bool,
    pub default_role: String,
    pub link_base_url: String,
}

impl TryFrom<&IdentitySettings> for FlowConfig {
    type Error = anyhow::Error;

    fn try_from(settings: &IdentitySettings) -> anyhow::Result<Self> {
        Ok(Self {
            otp_mode: settings.otp()?,
            otp_ttl_secs: settings.otp_ttl_secs,
            multi_device_login: settings.multi_device_login,
            default_role: settings.default_role.clone(),
            link_base_url: settings.link_base_url.clone(),
        })
    }
}

/// Tokens handed out when a session is established
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutput {
    pub id: Uuid,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// What an emailed-link step produced
struct LinkIssued {
    link_id: Uuid,
    expires_in_minutes: i64,
}

/// Everything needed to send a verify or reset link
struct LinkRequest<'a> {
    account: &'a Account,
    subject: OtpSubject,
    contact: &'a Contact,
    purpose: OtpPurpose,
    activity: ActivityType,
    token_type: TokenType,
    token_kind: TokenKind,
    path: &'static str,
    notification: NotificationKind,
    metadata: &'a RequestMetadata,
}

#[derive(Clone)]
pub struct IdentityFlows<S> {
    store: S,
    otp: OtpManager<S>,
    ledger: TokenLedger<S>,
    sessions: SessionTracker<S>,
    roles: RoleAdmin<S>,
    jwt: JwtService,
    notifier: Arc<dyn Notifier>,
    link_base_url: String,
}

impl<S: IdentityStore> IdentityFlows<S> {
    pub fn new(store: S, jwt: JwtService, notifier: Arc<dyn Notifier>, config: FlowConfig) -> Self {
        Self {
            otp: OtpManager::new(store.clone(), config.otp_mode, config.otp_ttl_secs),
            ledger: TokenLedger::new(store.clone()),
            sessions: SessionTracker::new(store.clone(), config.multi_device_login),
            roles: RoleAdmin::new(store.clone(), config.default_role),
            store,
            jwt,
            notifier,
            link_base_url: config.link_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn ledger(&self) -> &TokenLedger<S> {
        &self.ledger
    }

    pub fn sessions(&self) -> &SessionTracker<S> {
        &self.sessions
    }

    pub fn roles(&self) -> &RoleAdmin<S> {
        &self.roles
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    async fn role_name(&self, account: &Account) -> IdentityResult<Option<String>> {
        let Some(role_id) = account.role_id else {
            return Ok(None);
        };
        Ok(self.store.find_role(role_id).await?.map(|r| r.role_name))
    }

    /// Mint an access+refresh pair and record it against a new device row.
    async fn start_session(
        &self,
        account: &Account,
        activity: ActivityType,
        metadata: &RequestMetadata,
    ) -> IdentityResult<SessionOutput> {
        let principal = account.principal;
        let pair = self.mint_pair(account).await?;

        self.sessions
            .open_session(principal, activity, metadata, pair.to_new_token(principal, None))
            .await?;

        Ok(SessionOutput {
            id: principal.id(),
            email: account.email.clone(),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
        })
    }

    async fn mint_pair(&self, account: &Account) -> IdentityResult<MintedPair> {
        let role_name = self.role_name(account).await?;
        let access =
            self.jwt
                .generate_access_token(account.principal, account.email.clone(), role_name)?;
        let refresh = self.jwt.generate_refresh_token(account.principal)?;
        Ok(MintedPair {
            access_token: access.token,
            access_token_expiry: access.expires_at,
            refresh_token: refresh.token,
            refresh_token_expiry: refresh.expires_at,
            expires_in: self.jwt.access_token_expiry(),
        })
    }

    /// Issue an OTP, embed it in a signed link token, store the pending
    /// token with its device row, then hand the link to the notifier.
    async fn issue_link(&self, request: LinkRequest<'_>) -> IdentityResult<LinkIssued> {
        let principal = request.account.principal;
        let code = self
            .otp
            .generate(
                request.subject,
                request.contact.value(),
                request.contact.country_code(),
                request.purpose,
            )
            .await?;

        let signed = self.jwt.generate_link_token(
            principal,
            request.token_type,
            request.contact.value().to_string(),
            code,
        )?;

        let link_id = Uuid::new_v4();
        self.sessions
            .open_link_session(LinkSessionWrite {
                owner: principal,
                metadata: request.metadata.clone(),
                activity_type: request.activity,
                link_id,
                token_kind: request.token_kind,
                access_token: signed.token,
                access_token_expiry: signed.expires_at,
            })
            .await?;

        let expires_in_minutes = self.otp.ttl_minutes();
        self.notifier.deliver(Notification {
            kind: request.notification,
            recipient: request.contact.value().to_string(),
            code,
            link: Some(format!(
                "{}/{}?link_id={}",
                self.link_base_url, request.path, link_id
            )),
            link_id: Some(link_id),
            expires_in_minutes,
        });

        Ok(LinkIssued {
            link_id,
            expires_in_minutes,
        })
    }

    /// Load the account behind a principal decoded from a token.
    async fn account_for(&self, principal: Principal) -> IdentityResult<Option<Account>> {
        let account = self.store.find_account(principal).await?;
        if account.is_none() {
            warn!(%principal, "Token refers to a missing account");
        }
        Ok(account)
    }
}

struct MintedPair {
    access_token: String,
    access_token_expiry: chrono::DateTime<chrono::Utc>,
    refresh_token: String,
    refresh_token_expiry: chrono::DateTime<chrono::Utc>,
    expires_in: u64,
}

impl MintedPair {
    fn to_new_token(&self, owner: Principal, device_id: Option<Uuid>) -> NewToken {
        NewToken {
            owner,
            device_id,
            kind: TokenKind::Access,
            access_token: self.access_token.clone(),
            access_token_expiry: self.access_token_expiry,
            refresh_token: Some(self.refresh_token.clone()),
            refresh_token_expiry: Some(self.refresh_token_expiry),
        }
    }
}

fn link_expired() -> IdentityError {
    IdentityError::BadRequest("Invalid or expired link".into())
}
