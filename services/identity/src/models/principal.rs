//! Principal model and related functionality

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminant of an authenticatable identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Admin,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Admin => "admin",
        }
    }
}

impl FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PrincipalKind::User),
            "admin" => Ok(PrincipalKind::Admin),
            other => Err(format!("unknown principal kind: {other}")),
        }
    }
}

/// A user or admin identity.
///
/// Storage keeps two nullable foreign keys (`user_id`, `admin_id`);
/// everything above the repositories works against this single type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Principal {
    User(Uuid),
    Admin(Uuid),
}

impl Principal {
    pub fn new(kind: PrincipalKind, id: Uuid) -> Self {
        match kind {
            PrincipalKind::User => Principal::User(id),
            PrincipalKind::Admin => Principal::Admin(id),
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Principal::User(id) | Principal::Admin(id) => *id,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::User(_) => PrincipalKind::User,
            Principal::Admin(_) => PrincipalKind::Admin,
        }
    }

    /// Split into the `(user_id, admin_id)` column pair.
    pub fn columns(&self) -> (Option<Uuid>, Option<Uuid>) {
        match self {
            Principal::User(id) => (Some(*id), None),
            Principal::Admin(id) => (None, Some(*id)),
        }
    }

    /// Rebuild from the `(user_id, admin_id)` column pair. Exactly one
    /// side must be set.
    pub fn from_columns(user_id: Option<Uuid>, admin_id: Option<Uuid>) -> Option<Self> {
        match (user_id, admin_id) {
            (Some(id), None) => Some(Principal::User(id)),
            (None, Some(id)) => Some(Principal::Admin(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

/// Verification state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Unverified,
    Verified,
    Blocked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Unverified => "unverified",
            AccountStatus::Verified => "verified",
            AccountStatus::Blocked => "blocked",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(AccountStatus::Unverified),
            "verified" => Ok(AccountStatus::Verified),
            "blocked" => Ok(AccountStatus::Blocked),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// Account entity backing a principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub principal: Principal,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: AccountStatus,
    pub role_id: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// The address OTPs and links are delivered to.
    pub fn contact(&self) -> Option<&str> {
        self.email.as_deref().or(self.phone.as_deref())
    }
}

/// New account creation payload
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub kind: PrincipalKind,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub password_hash: String,
    pub role_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_round_trip_through_principal() {
        let id = Uuid::new_v4();
        let admin = Principal::Admin(id);
        let (user_id, admin_id) = admin.columns();
        assert_eq!(user_id, None);
        assert_eq!(Principal::from_columns(user_id, admin_id), Some(admin));
    }

    #[test]
    fn both_owner_columns_set_is_rejected() {
        let id = Some(Uuid::new_v4());
        assert_eq!(Principal::from_columns(id, id), None);
        assert_eq!(Principal::from_columns(None, None), None);
    }
}
