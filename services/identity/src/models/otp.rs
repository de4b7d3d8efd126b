//! One-time passcode model

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::{Principal, PrincipalKind};

/// Why a code was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Signup,
    Login,
    ForgotPassword,
    UpdateEmail,
    UpdatePhone,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Signup => "signup",
            OtpPurpose::Login => "login",
            OtpPurpose::ForgotPassword => "forgot_password",
            OtpPurpose::UpdateEmail => "update_email",
            OtpPurpose::UpdatePhone => "update_phone",
        }
    }
}

impl FromStr for OtpPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup" => Ok(OtpPurpose::Signup),
            "login" => Ok(OtpPurpose::Login),
            "forgot_password" => Ok(OtpPurpose::ForgotPassword),
            "update_email" => Ok(OtpPurpose::UpdateEmail),
            "update_phone" => Ok(OtpPurpose::UpdatePhone),
            other => Err(format!("unknown otp purpose: {other}")),
        }
    }
}

/// Shared active/inactive flag used by OTP rows and both token halves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "inactive" => Ok(RecordStatus::Inactive),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Who an OTP row belongs to.
///
/// Codes issued before an account exists carry no owner. They are keyed by
/// the principal kind being signed up and the raw contact, since a user and
/// an admin may share an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OtpSubject {
    Principal(Principal),
    PendingContact {
        kind: PrincipalKind,
        contact: String,
    },
}

impl OtpSubject {
    pub fn pending(kind: PrincipalKind, contact: impl Into<String>) -> Self {
        OtpSubject::PendingContact {
            kind,
            contact: contact.into(),
        }
    }

    pub fn owner(&self) -> Option<Principal> {
        match self {
            OtpSubject::Principal(p) => Some(*p),
            OtpSubject::PendingContact { .. } => None,
        }
    }

    /// Kind recorded on ownerless rows.
    pub fn pending_kind(&self) -> Option<PrincipalKind> {
        match self {
            OtpSubject::Principal(_) => None,
            OtpSubject::PendingContact { kind, .. } => Some(*kind),
        }
    }
}

impl From<Principal> for OtpSubject {
    fn from(principal: Principal) -> Self {
        OtpSubject::Principal(principal)
    }
}

/// Classified delivery address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contact {
    Email(String),
    Phone {
        number: String,
        country_code: Option<String>,
    },
}

impl Contact {
    pub fn email(&self) -> Option<&str> {
        match self {
            Contact::Email(e) => Some(e),
            Contact::Phone { .. } => None,
        }
    }

    pub fn phone(&self) -> Option<&str> {
        match self {
            Contact::Phone { number, .. } => Some(number),
            Contact::Email(_) => None,
        }
    }

    pub fn country_code(&self) -> Option<&str> {
        match self {
            Contact::Phone { country_code, .. } => country_code.as_deref(),
            Contact::Email(_) => None,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Contact::Email(e) => e,
            Contact::Phone { number, .. } => number,
        }
    }
}

/// OTP entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Otp {
    pub id: Uuid,
    pub owner: Option<Principal>,
    pub pending_kind: Option<PrincipalKind>,
    #[serde(skip_serializing)]
    pub code: u32,
    pub purpose: OtpPurpose,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub is_verified: bool,
    pub status: RecordStatus,
    pub expire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Otp {
    /// True when the row still accepts `code` at `now`.
    pub fn accepts(&self, code: u32, now: DateTime<Utc>) -> bool {
        self.code == code
            && self.status == RecordStatus::Active
            && !self.is_verified
            && self.expire_at > now
    }

    /// True when the row belongs to `subject`.
    pub fn belongs_to(&self, subject: &OtpSubject) -> bool {
        match subject {
            OtpSubject::Principal(p) => self.owner == Some(*p),
            OtpSubject::PendingContact { kind, contact } => {
                let contact = Some(contact.as_str());
                self.owner.is_none()
                    && self.pending_kind == Some(*kind)
                    && (self.email.as_deref() == contact || self.phone.as_deref() == contact)
            }
        }
    }
}

/// OTP upsert payload; replaces any row for the same subject and purpose
#[derive(Debug, Clone)]
pub struct NewOtp {
    pub subject: OtpSubject,
    pub code: u32,
    pub purpose: OtpPurpose,
    pub contact: Contact,
    pub expire_at: DateTime<Utc>,
}
