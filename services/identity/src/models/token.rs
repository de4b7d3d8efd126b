//! Token ledger model

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::otp::RecordStatus;
use super::principal::Principal;

/// What a token row was minted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[default]
    Access,
    Refresh,
    Verify,
    Reset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Verify => "verify",
            TokenKind::Reset => "reset",
        }
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            "verify" => Ok(TokenKind::Verify),
            "reset" => Ok(TokenKind::Reset),
            other => Err(format!("unknown token kind: {other}")),
        }
    }
}

/// One half of a token row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSide {
    Access,
    Refresh,
}

/// Token entity. Each side carries its own status and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub owner: Principal,
    pub device_id: Option<Uuid>,
    pub kind: TokenKind,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub access_token_status: RecordStatus,
    pub refresh_token_status: RecordStatus,
    pub access_token_expiry: DateTime<Utc>,
    pub refresh_token_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    pub fn raw(&self, side: TokenSide) -> Option<&str> {
        match side {
            TokenSide::Access => Some(&self.access_token),
            TokenSide::Refresh => self.refresh_token.as_deref(),
        }
    }

    pub fn status(&self, side: TokenSide) -> RecordStatus {
        match side {
            TokenSide::Access => self.access_token_status,
            TokenSide::Refresh => self.refresh_token_status,
        }
    }

    pub fn expiry(&self, side: TokenSide) -> Option<DateTime<Utc>> {
        match side {
            TokenSide::Access => Some(self.access_token_expiry),
            TokenSide::Refresh => self.refresh_token_expiry,
        }
    }

    /// Active and strictly unexpired. Both conditions are required.
    pub fn is_live(&self, side: TokenSide, now: DateTime<Utc>) -> bool {
        self.raw(side).is_some()
            && self.status(side) == RecordStatus::Active
            && self.expiry(side).is_some_and(|exp| exp > now)
    }

    /// Either side still live.
    pub fn any_live(&self, now: DateTime<Utc>) -> bool {
        self.is_live(TokenSide::Access, now) || self.is_live(TokenSide::Refresh, now)
    }

    pub fn fully_inactive(&self) -> bool {
        self.access_token_status == RecordStatus::Inactive
            && self.refresh_token_status == RecordStatus::Inactive
    }

    pub(crate) fn set_status(&mut self, side: TokenSide, status: RecordStatus) {
        match side {
            TokenSide::Access => self.access_token_status = status,
            TokenSide::Refresh => self.refresh_token_status = status,
        }
    }
}

/// New token payload
#[derive(Debug, Clone)]
pub struct NewToken {
    pub owner: Principal,
    pub device_id: Option<Uuid>,
    pub kind: TokenKind,
    pub access_token: String,
    pub access_token_expiry: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub refresh_token_expiry: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(access_expiry: DateTime<Utc>) -> Token {
        let now = Utc::now();
        Token {
            id: Uuid::new_v4(),
            owner: Principal::User(Uuid::new_v4()),
            device_id: None,
            kind: TokenKind::Access,
            access_token: "a".into(),
            refresh_token: None,
            access_token_status: RecordStatus::Active,
            // A missing refresh half is stored inactive.
            refresh_token_status: RecordStatus::Inactive,
            access_token_expiry: access_expiry,
            refresh_token_expiry: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn missing_refresh_side_is_never_live() {
        let t = token(Utc::now() + Duration::minutes(5));
        assert!(t.is_live(TokenSide::Access, Utc::now()));
        assert!(!t.is_live(TokenSide::Refresh, Utc::now()));
    }

    #[test]
    fn expiry_equal_to_now_is_not_live() {
        let now = Utc::now();
        let t = token(now);
        assert!(!t.is_live(TokenSide::Access, now));
    }
}
