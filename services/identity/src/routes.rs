//! HTTP surface of the identity service

use std::collections::BTreeMap;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::authz::AuthorizationEngine;
use crate::error::{IdentityError, IdentityResult};
use crate::flows::{
    ForgotPasswordInput, IdentityFlows, LoginInput, RefreshInput, ResetPasswordInput, SignupInput,
    VerifyLoginInput, VerifySignupInput,
};
use crate::middleware::{AuthContext, capture_metadata, require_auth};
use crate::models::{Principal, PrincipalKind, RequestMetadata};
use crate::rate_limiter::RateLimiter;
use crate::repositories::IdentityStore;
use crate::validation::classify_contact;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState<S> {
    pub flows: IdentityFlows<S>,
    pub authz: AuthorizationEngine<S>,
    pub limiter: RateLimiter,
}

#[derive(Deserialize)]
pub struct RoleRequest {
    pub role_name: String,
}

#[derive(Deserialize)]
pub struct SectionRequest {
    pub section_name: String,
}

#[derive(Deserialize)]
pub struct PermissionRequest {
    pub permission_name: String,
}

/// Section name → permission names; replaces the role's current grants
#[derive(Deserialize)]
pub struct RolePermissionsRequest {
    pub grants: BTreeMap<String, Vec<String>>,
}

/// Create the router for the identity service
pub fn create_router<S: IdentityStore>(state: AppState<S>) -> Router {
    let protected = Router::new()
        .route("/auth/logout", post(logout::<S>))
        .route("/roles", post(create_role::<S>))
        .route("/roles/:role_id", delete(delete_role::<S>))
        .route(
            "/roles/:role_id/permissions",
            get(list_role_grants::<S>).put(update_role_permissions::<S>),
        )
        .route("/sections", post(create_section::<S>))
        .route("/permissions", post(create_permission::<S>))
        .route("/principals/:kind/:id/role", post(assign_role::<S>))
        .route(
            "/principals/:kind/:id/role/:role_name",
            delete(remove_role::<S>),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth::<S>,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/signup", post(signup::<S>))
        .route("/auth/verify-signup", post(verify_signup::<S>))
        .route("/auth/login", post(login::<S>))
        .route("/auth/verify-login", post(verify_login::<S>))
        .route("/auth/forgot-password", post(forgot_password::<S>))
        .route("/auth/reset-password", post(reset_password::<S>))
        .route("/auth/refresh", post(refresh_token::<S>))
        .merge(protected)
        .layer(middleware::from_fn(capture_metadata))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "identity"
    }))
}

/// Limiter key for `contact`, normalised the same way the flows classify
/// it so spelling variants of one address share a bucket.
fn attempt_key(prefix: &str, contact: &str, country_code: Option<&str>) -> String {
    let normalized = match classify_contact(contact, country_code) {
        Ok(contact) => contact.value().to_lowercase(),
        Err(_) => contact.trim().to_lowercase(),
    };
    format!("{prefix}:{normalized}")
}

async fn throttle<S>(state: &AppState<S>, key: String) -> IdentityResult<()> {
    if state.limiter.try_acquire(&key).await {
        Ok(())
    } else {
        Err(IdentityError::TooManyAttempts)
    }
}

async fn signup<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(metadata): Extension<RequestMetadata>,
    Json(mut input): Json<SignupInput>,
) -> IdentityResult<impl IntoResponse> {
    input.metadata = metadata;
    let output = state.flows.signup(input).await?;
    Ok((StatusCode::CREATED, Json(output)))
}

async fn verify_signup<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(metadata): Extension<RequestMetadata>,
    Json(mut input): Json<VerifySignupInput>,
) -> IdentityResult<impl IntoResponse> {
    input.metadata = metadata;
    Ok(Json(state.flows.verify_signup(input).await?))
}

async fn login<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(metadata): Extension<RequestMetadata>,
    Json(mut input): Json<LoginInput>,
) -> IdentityResult<impl IntoResponse> {
    let key = attempt_key("login", &input.contact, input.country_code.as_deref());
    throttle(&state, key).await?;
    input.metadata = metadata;
    Ok(Json(state.flows.login(input).await?))
}

async fn verify_login<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(metadata): Extension<RequestMetadata>,
    Json(mut input): Json<VerifyLoginInput>,
) -> IdentityResult<impl IntoResponse> {
    let key = attempt_key("otp", &input.contact, input.country_code.as_deref());
    throttle(&state, key.clone()).await?;
    input.metadata = metadata;
    let session = state.flows.verify_login(input).await?;
    state.limiter.reset(&key).await;
    Ok(Json(session))
}

async fn forgot_password<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(metadata): Extension<RequestMetadata>,
    Json(mut input): Json<ForgotPasswordInput>,
) -> IdentityResult<impl IntoResponse> {
    let key = attempt_key("forgot", &input.contact, input.country_code.as_deref());
    throttle(&state, key).await?;
    input.metadata = metadata;
    Ok(Json(state.flows.forgot_password(input).await?))
}

async fn reset_password<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(metadata): Extension<RequestMetadata>,
    Json(mut input): Json<ResetPasswordInput>,
) -> IdentityResult<impl IntoResponse> {
    input.metadata = metadata;
    state.flows.reset_password(input).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh_token<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(metadata): Extension<RequestMetadata>,
    Json(mut input): Json<RefreshInput>,
) -> IdentityResult<impl IntoResponse> {
    input.metadata = metadata;
    Ok(Json(state.flows.refresh_token(input).await?))
}

async fn logout<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Extension(metadata): Extension<RequestMetadata>,
) -> IdentityResult<impl IntoResponse> {
    state
        .flows
        .logout(auth.principal, &auth.raw_token, &metadata)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_role<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Json(input): Json<RoleRequest>,
) -> IdentityResult<impl IntoResponse> {
    state.authz.authorize(Some(auth.principal), "roles.create").await?;
    let role = state.flows.roles().create_role(&input.role_name).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

async fn delete_role<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(role_id): Path<Uuid>,
) -> IdentityResult<impl IntoResponse> {
    state.authz.authorize(Some(auth.principal), "roles.delete").await?;
    state.flows.roles().soft_delete_role(role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_role_grants<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(role_id): Path<Uuid>,
) -> IdentityResult<impl IntoResponse> {
    state
        .authz
        .authorize(Some(auth.principal), "roles.list_grants")
        .await?;
    Ok(Json(state.flows.roles().list_role_grants(role_id).await?))
}

async fn update_role_permissions<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(role_id): Path<Uuid>,
    Json(input): Json<RolePermissionsRequest>,
) -> IdentityResult<impl IntoResponse> {
    state
        .authz
        .authorize(Some(auth.principal), "roles.update_permissions")
        .await?;
    let grants = state
        .flows
        .roles()
        .update_role_permissions(role_id, input.grants)
        .await?;
    Ok(Json(grants))
}

async fn create_section<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Json(input): Json<SectionRequest>,
) -> IdentityResult<impl IntoResponse> {
    state
        .authz
        .authorize(Some(auth.principal), "sections.create")
        .await?;
    let section = state
        .flows
        .roles()
        .create_section(&input.section_name)
        .await?;
    Ok((StatusCode::CREATED, Json(section)))
}

async fn create_permission<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Json(input): Json<PermissionRequest>,
) -> IdentityResult<impl IntoResponse> {
    state
        .authz
        .authorize(Some(auth.principal), "permissions.create")
        .await?;
    let permission = state
        .flows
        .roles()
        .create_permission(&input.permission_name)
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

async fn assign_role<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path((kind, id)): Path<(PrincipalKind, Uuid)>,
    Json(input): Json<RoleRequest>,
) -> IdentityResult<impl IntoResponse> {
    state.authz.authorize(Some(auth.principal), "roles.assign").await?;
    let role = state
        .flows
        .roles()
        .assign_role(Principal::new(kind, id), &input.role_name)
        .await?;
    Ok(Json(role))
}

async fn remove_role<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path((kind, id, role_name)): Path<(PrincipalKind, Uuid, String)>,
) -> IdentityResult<impl IntoResponse> {
    state.authz.authorize(Some(auth.principal), "roles.remove").await?;
    let fallback = state
        .flows
        .roles()
        .remove_role(Principal::new(kind, id), &role_name)
        .await?;
    Ok(Json(serde_json::json!({
        "role": fallback.map(|r| r.role_name),
    })))
}
