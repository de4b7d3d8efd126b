//! Error taxonomy for the identity service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Why an authorization check refused access.
///
/// Kept distinct for logs; every variant renders the same response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No authenticated principal reached the guard
    MissingPrincipal,
    /// The operation declares no role rules
    NoRequiredRules,
    /// The principal holds none of the allowed roles
    RoleMismatch,
    /// The role holds none of the required permissions
    PermissionMismatch,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::MissingPrincipal => "no user in request context",
            DenyReason::NoRequiredRules => "operation declares no required roles",
            DenyReason::RoleMismatch => "user does not have the required role",
            DenyReason::PermissionMismatch => "user does not have the required permissions",
        }
    }
}

/// Custom error type for the identity service
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Missing or invalid credentials, token or OTP
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Role or permission check failed
    #[error("Forbidden: {}", .0.as_str())]
    Forbidden(DenyReason),

    /// Duplicate entity
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Structurally invalid or disallowed request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Attempt limit reached for this client
    #[error("Too many attempts")]
    TooManyAttempts,

    /// Storage failure
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Signer failure
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Any other internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdentityError {
    /// Generic OTP failure; never says whether the code was wrong, used or expired.
    pub fn invalid_otp() -> Self {
        IdentityError::Unauthenticated("Invalid OTP".into())
    }

    /// Generic credential failure; never says whether the account exists.
    pub fn wrong_credentials() -> Self {
        IdentityError::Unauthenticated("Wrong credentials".into())
    }

    pub fn invalid_token() -> Self {
        IdentityError::Unauthenticated("Invalid or expired token".into())
    }

    /// Map a unique-constraint violation to a conflict on `entity`.
    pub fn conflict_on(entity: &str) -> impl FnOnce(DatabaseError) -> IdentityError + '_ {
        move |err| match err {
            DatabaseError::UniqueViolation(_) => {
                IdentityError::Conflict(format!("{entity} already exists"))
            }
            other => IdentityError::Database(other),
        }
    }
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            IdentityError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            IdentityError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            IdentityError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            IdentityError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            IdentityError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            IdentityError::TooManyAttempts => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many attempts, try again later".to_string(),
            ),
            IdentityError::Database(_) | IdentityError::Token(_) | IdentityError::Internal(_) => {
                error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for identity results
pub type IdentityResult<T> = Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_reasons_share_one_response() {
        for reason in [
            DenyReason::MissingPrincipal,
            DenyReason::RoleMismatch,
            DenyReason::PermissionMismatch,
        ] {
            let response = IdentityError::Forbidden(reason).into_response();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err = IdentityError::conflict_on("Role")(DatabaseError::UniqueViolation("x".into()));
        assert!(matches!(err, IdentityError::Conflict(msg) if msg == "Role already exists"));
    }
}
