use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{IdentityFlows, SessionOutput};
use crate::error::{IdentityError, IdentityResult};
use crate::models::{
    AccountStatus, ActivityType, OtpPurpose, OtpSubject, PrincipalKind, RequestMetadata,
};
use crate::notifier::{Notification, NotificationKind};
use crate::password::verify_password;
use crate::repositories::IdentityStore;
use crate::validation::{classify_contact, validate_otp};

fn default_kind() -> PrincipalKind {
    PrincipalKind::User
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    #[serde(default = "default_kind")]
    pub kind: PrincipalKind,
    pub contact: String,
    pub country_code: Option<String>,
    pub password: String,
    #[serde(skip)]
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutput {
    pub id: Uuid,
    pub otp_sent: bool,
    pub expires_in_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyLoginInput {
    #[serde(default = "default_kind")]
    pub kind: PrincipalKind,
    pub contact: String,
    pub country_code: Option<String>,
    pub otp: u32,
    #[serde(skip)]
    pub metadata: RequestMetadata,
}

impl<S: IdentityStore> IdentityFlows<S> {
    /// Check the password and send a login code. No session is granted here.
    pub async fn login(&self, input: LoginInput) -> IdentityResult<LoginOutput> {
        let contact = classify_contact(&input.contact, input.country_code.as_deref())
            .map_err(|_| IdentityError::wrong_credentials())?;

        let Some(account) = self
            .store
            .find_account_by_contact(input.kind, contact.value())
            .await?
        else {
            debug!("Login for unknown contact");
            return Err(IdentityError::wrong_credentials());
        };

        if !verify_password(&input.password, &account.password_hash)? {
            debug!(principal = %account.principal, "Login with wrong password");
            return Err(IdentityError::wrong_credentials());
        }

        match account.status {
            AccountStatus::Blocked => {
                return Err(IdentityError::BadRequest("Account is blocked".into()));
            }
            AccountStatus::Unverified => {
                return Err(IdentityError::BadRequest(
                    "Account is not verified; complete signup first".into(),
                ));
            }
            AccountStatus::Verified => {}
        }

        let code = self
            .otp
            .generate(
                OtpSubject::Principal(account.principal),
                contact.value(),
                contact.country_code(),
                OtpPurpose::Login,
            )
            .await?;

        let expires_in_minutes = self.otp.ttl_minutes();
        self.notifier.deliver(Notification {
            kind: NotificationKind::LoginOtp,
            recipient: contact.value().to_string(),
            code,
            link: None,
            link_id: None,
            expires_in_minutes,
        });

        info!(principal = %account.principal, "Login code sent");
        Ok(LoginOutput {
            id: account.principal.id(),
            otp_sent: true,
            expires_in_minutes,
        })
    }

    /// Exchange a login code for a session.
    pub async fn verify_login(&self, input: VerifyLoginInput) -> IdentityResult<SessionOutput> {
        validate_otp(input.otp).map_err(IdentityError::BadRequest)?;
        let contact = classify_contact(&input.contact, input.country_code.as_deref())
            .map_err(IdentityError::BadRequest)?;

        let account = self
            .store
            .find_account_by_contact(input.kind, contact.value())
            .await?
            .ok_or_else(IdentityError::invalid_otp)?;
        if account.status == AccountStatus::Blocked {
            return Err(IdentityError::BadRequest("Account is blocked".into()));
        }

        if !self
            .otp
            .validate(
                &OtpSubject::Principal(account.principal),
                OtpPurpose::Login,
                input.otp,
            )
            .await?
        {
            return Err(IdentityError::invalid_otp());
        }

        self.sessions.enforce_single_session(account.principal).await?;
        let session = self
            .start_session(&account, ActivityType::Login, &input.metadata)
            .await?;
        info!(principal = %account.principal, "Login verified");
        Ok(session)
    }
}
