use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{IdentityFlows, LinkRequest, link_expired};
use crate::error::{IdentityError, IdentityResult};
use crate::jwt::TokenType;
use crate::models::{
    AccountStatus, ActivityType, OtpPurpose, OtpSubject, PrincipalKind, RequestMetadata,
    TokenKind, TokenSide,
};
use crate::notifier::NotificationKind;
use crate::password::hash_password;
use crate::repositories::IdentityStore;
use crate::validation::{classify_contact, validate_password};

fn default_kind() -> PrincipalKind {
    PrincipalKind::User
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgotPasswordInput {
    #[serde(default = "default_kind")]
    pub kind: PrincipalKind,
    pub contact: String,
    pub country_code: Option<String>,
    #[serde(skip)]
    pub metadata: RequestMetadata,
}

/// Identical whether or not the contact matched an account
#[derive(Debug, Clone, Serialize)]
pub struct ForgotPasswordOutput {
    pub expires_in_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordInput {
    pub link_id: Uuid,
    pub new_password: String,
    #[serde(skip)]
    pub metadata: RequestMetadata,
}

impl<S: IdentityStore> IdentityFlows<S> {
    /// Send a reset link. Repeated requests from the same device type
    /// refresh the pending link instead of adding rows.
    pub async fn forgot_password(
        &self,
        input: ForgotPasswordInput,
    ) -> IdentityResult<ForgotPasswordOutput> {
        let contact = classify_contact(&input.contact, input.country_code.as_deref())
            .map_err(IdentityError::BadRequest)?;

        let Some(account) = self
            .store
            .find_account_by_contact(input.kind, contact.value())
            .await?
        else {
            debug!("Password reset for unknown contact");
            return Ok(ForgotPasswordOutput {
                expires_in_minutes: self.otp.ttl_minutes(),
            });
        };
        if account.status == AccountStatus::Blocked {
            return Err(IdentityError::BadRequest("Account is blocked".into()));
        }

        let issued = self
            .issue_link(LinkRequest {
                account: &account,
                subject: OtpSubject::Principal(account.principal),
                contact: &contact,
                purpose: OtpPurpose::ForgotPassword,
                activity: ActivityType::ForgotPassword,
                token_type: TokenType::Reset,
                token_kind: TokenKind::Reset,
                path: "reset-password",
                notification: NotificationKind::PasswordReset,
                metadata: &input.metadata,
            })
            .await?;

        info!(principal = %account.principal, link_id = %issued.link_id, "Password reset sent");
        Ok(ForgotPasswordOutput {
            expires_in_minutes: issued.expires_in_minutes,
        })
    }

    /// Set a new password from a clicked reset link.
    pub async fn reset_password(&self, input: ResetPasswordInput) -> IdentityResult<()> {
        let token = self
            .ledger
            .find_token_record(input.link_id, ActivityType::ForgotPassword)
            .await?
            .ok_or_else(link_expired)?;
        validate_password(&input.new_password).map_err(IdentityError::BadRequest)?;

        if !self
            .ledger
            .validate(&token.access_token, TokenSide::Access)
            .await?
        {
            return Err(link_expired());
        }

        let claims = self
            .jwt
            .validate_token(&token.access_token)
            .map_err(|_| link_expired())?;
        if claims.token_type != TokenType::Reset || claims.principal() != token.owner {
            return Err(IdentityError::invalid_token());
        }
        let Some(code) = claims.otp else {
            return Err(IdentityError::invalid_token());
        };

        let account = self
            .account_for(token.owner)
            .await?
            .ok_or_else(link_expired)?;
        if account.status == AccountStatus::Blocked {
            return Err(IdentityError::BadRequest("Account is blocked".into()));
        }

        // The link can outlive its code; check expiry before consuming.
        let subject = OtpSubject::Principal(account.principal);
        let pending = self.otp.find(&subject, OtpPurpose::ForgotPassword).await?;
        if pending.is_none_or(|otp| otp.expire_at < Utc::now()) {
            return Err(link_expired());
        }

        if !self
            .otp
            .validate(&subject, OtpPurpose::ForgotPassword, code)
            .await?
        {
            return Err(IdentityError::invalid_otp());
        }

        let password_hash = hash_password(&input.new_password)?;
        self.store
            .update_password_hash(account.principal, &password_hash)
            .await?;
        self.ledger.invalidate(&token, TokenSide::Access).await?;
        self.sessions
            .record_activity(account.principal, ActivityType::ResetPassword, &input.metadata)
            .await?;

        info!(principal = %account.principal, "Password reset");
        Ok(())
    }
}
