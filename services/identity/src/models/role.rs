//! Role, section and permission models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub role_name: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Functional area, e.g. "dashboard"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: Uuid,
    pub section_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named capability, e.g. "create"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub permission_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Junction row `{role, section, permission}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSectionPermission {
    pub id: Uuid,
    pub role_id: Uuid,
    pub section_id: Uuid,
    pub permission_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An effective grant, resolved to names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub section_name: String,
    pub permission_name: String,
}

/// One acceptable `(role, section, permissions)` combination for an operation.
///
/// An empty `permissions` list means holding the role is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    pub role: String,
    pub section: Option<String>,
    pub permissions: Vec<String>,
}

impl RoleRule {
    /// Role-only gate.
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            section: None,
            permissions: Vec::new(),
        }
    }

    /// Role plus any of `permissions` on `section`.
    pub fn scoped<I, S>(role: impl Into<String>, section: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            section: Some(section.into()),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}
