//! Device/session activity model

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::Principal;

/// Auth-relevant action a device row records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Signup,
    SignupVerification,
    Login,
    Logout,
    ForgotPassword,
    ResetPassword,
    RefreshToken,
    ProfileView,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Signup => "signup",
            ActivityType::SignupVerification => "signup_verification",
            ActivityType::Login => "login",
            ActivityType::Logout => "logout",
            ActivityType::ForgotPassword => "forgot_password",
            ActivityType::ResetPassword => "reset_password",
            ActivityType::RefreshToken => "refresh_token",
            ActivityType::ProfileView => "profile_view",
        }
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup" => Ok(ActivityType::Signup),
            "signup_verification" => Ok(ActivityType::SignupVerification),
            "login" => Ok(ActivityType::Login),
            "logout" => Ok(ActivityType::Logout),
            "forgot_password" => Ok(ActivityType::ForgotPassword),
            "reset_password" => Ok(ActivityType::ResetPassword),
            "refresh_token" => Ok(ActivityType::RefreshToken),
            "profile_view" => Ok(ActivityType::ProfileView),
            other => Err(format!("unknown activity type: {other}")),
        }
    }
}

/// Device metadata pulled from the inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub app_version: Option<String>,
    pub timezone: Option<String>,
}

/// Device session entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    pub id: Uuid,
    pub owner: Principal,
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub app_version: Option<String>,
    pub timezone: Option<String>,
    pub activity_type: ActivityType,
    pub is_active: bool,
    pub last_active_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub link_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New device session payload
#[derive(Debug, Clone)]
pub struct NewDeviceSession {
    pub owner: Principal,
    pub metadata: RequestMetadata,
    pub activity_type: ActivityType,
    pub is_active: bool,
    pub link_id: Option<Uuid>,
}

/// Joint write for emailed-link flows.
///
/// Resolves to an existing row for `(owner, device_type, activity_type)`
/// when there is one; its `link_id` and pending token are refreshed in place.
#[derive(Debug, Clone)]
pub struct LinkSessionWrite {
    pub owner: Principal,
    pub metadata: RequestMetadata,
    pub activity_type: ActivityType,
    pub link_id: Uuid,
    pub token_kind: super::token::TokenKind,
    pub access_token: String,
    pub access_token_expiry: DateTime<Utc>,
}

/// Result of a [`LinkSessionWrite`]
#[derive(Debug, Clone)]
pub struct LinkSession {
    pub device: DeviceSession,
    pub token: super::token::Token,
    /// False when an existing row was refreshed in place.
    pub created: bool,
}
