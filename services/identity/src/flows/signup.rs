use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{IdentityFlows, LinkRequest, SessionOutput, link_expired};
use crate::error::{IdentityError, IdentityResult};
use crate::jwt::TokenType;
use crate::models::{
    AccountStatus, ActivityType, NewAccount, OtpPurpose, OtpSubject, PrincipalKind,
    RequestMetadata, TokenKind, TokenSide,
};
use crate::notifier::NotificationKind;
use crate::password::hash_password;
use crate::repositories::IdentityStore;
use crate::validation::{classify_contact, validate_password};

#[derive(Debug, Clone, Deserialize)]
pub struct SignupInput {
    #[serde(default = "default_kind")]
    pub kind: PrincipalKind,
    /// Email address or phone number
    pub contact: String,
    pub country_code: Option<String>,
    pub password: String,
    #[serde(skip)]
    pub metadata: RequestMetadata,
}

fn default_kind() -> PrincipalKind {
    PrincipalKind::User
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupOutput {
    pub id: Uuid,
    /// True when an unverified account got a fresh code instead of a new row
    pub resent: bool,
    pub expires_in_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifySignupInput {
    pub link_id: Uuid,
    #[serde(skip)]
    pub metadata: RequestMetadata,
}

impl<S: IdentityStore> IdentityFlows<S> {
    /// Create an account, or re-send verification for one still unverified.
    ///
    /// A resend replaces the stored password with the one just supplied.
    pub async fn signup(&self, input: SignupInput) -> IdentityResult<SignupOutput> {
        let contact = classify_contact(&input.contact, input.country_code.as_deref())
            .map_err(IdentityError::BadRequest)?;
        validate_password(&input.password).map_err(IdentityError::BadRequest)?;

        let existing = self
            .store
            .find_account_by_contact(input.kind, contact.value())
            .await?;

        let (account, resent) = match existing {
            Some(account) => match account.status {
                AccountStatus::Blocked => {
                    return Err(IdentityError::BadRequest("Account is blocked".into()));
                }
                AccountStatus::Verified => {
                    return Err(IdentityError::Conflict("Account already exists".into()));
                }
                AccountStatus::Unverified => {
                    self.store
                        .update_password_hash(account.principal, &hash_password(&input.password)?)
                        .await?;
                    (account, true)
                }
            },
            None => {
                let account = self
                    .store
                    .create_account(NewAccount {
                        kind: input.kind,
                        email: contact.email().map(str::to_string),
                        phone: contact.phone().map(str::to_string),
                        country_code: contact.country_code().map(str::to_string),
                        password_hash: hash_password(&input.password)?,
                        role_id: self.roles.default_role_id().await?,
                    })
                    .await
                    .map_err(IdentityError::conflict_on("Account"))?;
                info!(principal = %account.principal, "Account created");
                (account, false)
            }
        };

        let issued = self
            .issue_link(LinkRequest {
                account: &account,
                subject: OtpSubject::pending(input.kind, contact.value()),
                contact: &contact,
                purpose: OtpPurpose::Signup,
                activity: ActivityType::Signup,
                token_type: TokenType::Verify,
                token_kind: TokenKind::Verify,
                path: "verify-signup",
                notification: NotificationKind::SignupVerification,
                metadata: &input.metadata,
            })
            .await?;

        info!(
            principal = %account.principal,
            link_id = %issued.link_id,
            resent,
            "Signup verification sent"
        );
        Ok(SignupOutput {
            id: account.principal.id(),
            resent,
            expires_in_minutes: issued.expires_in_minutes,
        })
    }

    /// Complete signup from a clicked verification link.
    pub async fn verify_signup(&self, input: VerifySignupInput) -> IdentityResult<SessionOutput> {
        let token = self
            .ledger
            .find_token_record(input.link_id, ActivityType::Signup)
            .await?
            .ok_or_else(link_expired)?;

        let account = self
            .account_for(token.owner)
            .await?
            .ok_or_else(link_expired)?;
        match account.status {
            AccountStatus::Verified => {
                return Err(IdentityError::BadRequest("Account already verified".into()));
            }
            AccountStatus::Blocked => {
                return Err(IdentityError::BadRequest("Account is blocked".into()));
            }
            AccountStatus::Unverified => {}
        }

        if !self
            .ledger
            .validate(&token.access_token, TokenSide::Access)
            .await?
        {
            return Err(link_expired());
        }

        // The code travels inside the signed token; check it against the
        // stored OTP as well.
        let claims = self
            .jwt
            .validate_token(&token.access_token)
            .map_err(|_| link_expired())?;
        if claims.token_type != TokenType::Verify || claims.principal() != token.owner {
            return Err(IdentityError::invalid_token());
        }
        let (Some(contact), Some(code)) = (claims.email, claims.otp) else {
            return Err(IdentityError::invalid_token());
        };

        if !self
            .otp
            .validate(
                &OtpSubject::pending(token.owner.kind(), contact),
                OtpPurpose::Signup,
                code,
            )
            .await?
        {
            return Err(IdentityError::invalid_otp());
        }

        self.store
            .update_account_status(account.principal, AccountStatus::Verified)
            .await?;
        self.ledger.invalidate(&token, TokenSide::Access).await?;
        self.sessions.enforce_single_session(account.principal).await?;

        let session = self
            .start_session(&account, ActivityType::SignupVerification, &input.metadata)
            .await?;
        info!(principal = %account.principal, "Signup verified");
        Ok(session)
    }
}
