//! One-time passcode issuance and single-use verification

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::config::OtpMode;
use crate::error::{IdentityError, IdentityResult};
use crate::models::{NewOtp, Otp, OtpPurpose, OtpSubject};
use crate::repositories::OtpRepository;
use crate::validation::classify_contact;

const CODE_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

/// Issues and consumes 6-digit codes bound to a subject and purpose
#[derive(Clone)]
pub struct OtpManager<S> {
    store: S,
    mode: OtpMode,
    ttl: Duration,
}

impl<S: OtpRepository> OtpManager<S> {
    pub fn new(store: S, mode: OtpMode, ttl_secs: i64) -> Self {
        Self {
            store,
            mode,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl.num_minutes()
    }

    fn next_code(&self) -> u32 {
        match self.mode {
            OtpMode::Fixed(code) => code,
            OtpMode::Random => rand::thread_rng().gen_range(CODE_RANGE),
        }
    }

    /// Issue a code for `(subject, purpose)`, replacing any previous one.
    ///
    /// Returns the plaintext code for out-of-band delivery.
    pub async fn generate(
        &self,
        subject: OtpSubject,
        contact: &str,
        country_code: Option<&str>,
        purpose: OtpPurpose,
    ) -> IdentityResult<u32> {
        let contact = classify_contact(contact, country_code).map_err(IdentityError::BadRequest)?;
        let code = self.next_code();

        let otp = self
            .store
            .upsert_otp(NewOtp {
                subject,
                code,
                purpose,
                contact,
                expire_at: Utc::now() + self.ttl,
            })
            .await?;

        info!(otp_id = %otp.id, purpose = purpose.as_str(), "OTP issued");
        Ok(code)
    }

    /// Consume a matching active, unverified, unexpired code issued for
    /// `purpose`.
    ///
    /// Wrong, expired and already-used codes all yield `false`.
    pub async fn validate(
        &self,
        subject: &OtpSubject,
        purpose: OtpPurpose,
        code: u32,
    ) -> IdentityResult<bool> {
        let consumed = self
            .store
            .consume_otp(subject, purpose, code, Utc::now())
            .await?;
        if consumed {
            info!("OTP consumed");
        } else {
            debug!("OTP rejected");
        }
        Ok(consumed)
    }

    /// Current row for `(subject, purpose)`, whatever its state.
    pub async fn find(
        &self,
        subject: &OtpSubject,
        purpose: OtpPurpose,
    ) -> IdentityResult<Option<Otp>> {
        Ok(self.store.find_otp(subject, purpose).await?)
    }
}
