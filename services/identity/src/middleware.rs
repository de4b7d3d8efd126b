//! Request middleware: device metadata capture and bearer authentication

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::debug;

use crate::error::{IdentityError, IdentityResult};
use crate::jwt::{Claims, TokenType};
use crate::models::{Principal, RequestMetadata, TokenSide};
use crate::repositories::IdentityStore;
use crate::routes::AppState;

/// Authenticated caller, inserted into request extensions by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Principal,
    pub claims: Claims,
    pub raw_token: String,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Device metadata from the `x-device-*` family of headers.
///
/// The client address is the first hop of `x-forwarded-for`.
pub fn request_metadata(headers: &HeaderMap) -> RequestMetadata {
    RequestMetadata {
        device_id: header(headers, "x-device-id"),
        device_type: header(headers, "x-device-type"),
        device_name: header(headers, "x-device-name"),
        ip_address: header(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        app_version: header(headers, "x-app-version"),
        timezone: header(headers, "x-timezone"),
    }
}

/// Attach [`RequestMetadata`] to every request.
pub async fn capture_metadata(mut request: Request, next: Next) -> Response {
    let metadata = request_metadata(request.headers());
    request.extensions_mut().insert(metadata);
    next.run(request).await
}

/// Reject requests without a live access token.
///
/// The signature is checked first, then the ledger row: a revoked token
/// with a valid signature is still rejected.
pub async fn require_auth<S: IdentityStore>(
    State(state): State<AppState<S>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> IdentityResult<Response> {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(IdentityError::Unauthenticated("Missing bearer token".into()));
    };
    let raw = bearer.token();

    let claims = state.flows.jwt().validate_token(raw).map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        IdentityError::invalid_token()
    })?;
    if claims.token_type != TokenType::Access {
        return Err(IdentityError::invalid_token());
    }
    if !state.flows.ledger().validate(raw, TokenSide::Access).await? {
        debug!(principal = %claims.principal(), "Bearer token revoked or expired");
        return Err(IdentityError::invalid_token());
    }

    request.extensions_mut().insert(AuthContext {
        principal: claims.principal(),
        raw_token: raw.to_string(),
        claims,
    });
    Ok(next.run(request).await)
}
