//! Authentication handlers: the four login methods, the two-factor gate,
//! token rotation, and password self-service.

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::dtos::auth::{
    CertificateLoginRequest, ChangePasswordRequest, ConfirmEmailQuery, DirectoryLoginRequest,
    ForgotPasswordRequest, LoginRequest, MessageResponse, RefreshRequest, ResetPasswordRequest,
    TwoFactorVerifyRequest,
};
use crate::models::TokenPair;
use crate::services::{LoginOutcome, LoginStatus, ServiceError};
use crate::AppState;

/// Every login path answers with the uniform outcome value; the HTTP
/// status mirrors it so plain clients need not inspect the body.
fn outcome_response(outcome: LoginOutcome) -> impl IntoResponse {
    let status = match outcome.status {
        LoginStatus::Ok | LoginStatus::TwoFactorRequired => StatusCode::OK,
        _ => StatusCode::UNAUTHORIZED,
    };
    (status, Json(outcome))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;
    let outcome = state
        .login
        .login_with_password(&req.email, &req.password)
        .await?;
    Ok(outcome_response(outcome))
}

/// POST /auth/login/directory
pub async fn login_directory(
    State(state): State<AppState>,
    Json(req): Json<DirectoryLoginRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;
    let outcome = state
        .login
        .login_with_directory(req.domain.as_deref(), &req.username, &req.password)
        .await?;
    Ok(outcome_response(outcome))
}

/// POST /auth/login/certificate
pub async fn login_certificate(
    State(state): State<AppState>,
    Json(req): Json<CertificateLoginRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;
    let outcome = state.login.login_with_certificate(&req.thumbprint).await?;
    Ok(outcome_response(outcome))
}

/// POST /auth/two-factor/verify
pub async fn verify_two_factor(
    State(state): State<AppState>,
    Json(req): Json<TwoFactorVerifyRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;
    let outcome = state
        .login
        .verify_two_factor(&req.challenge_id, &req.code)
        .await?;
    Ok(outcome_response(outcome))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ServiceError> {
    req.validate()?;
    let pair = state.login.refresh(&req.refresh_token).await?;
    Ok(Json(pair))
}

/// GET /auth/confirm-email?token=...
pub async fn confirm_email(
    State(state): State<AppState>,
    Query(query): Query<ConfirmEmailQuery>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state.accounts.confirm_email(&query.token).await?;
    Ok(Json(MessageResponse {
        message: "email address confirmed".to_string(),
    }))
}

/// POST /auth/forgot-password
///
/// Always answers 200 so the endpoint does not reveal which addresses are
/// registered.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ServiceError> {
    req.validate()?;
    state.accounts.forgot_password(&req.email).await?;
    Ok(Json(MessageResponse {
        message: "if the address is registered, a reset link has been sent".to_string(),
    }))
}

/// POST /auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state.accounts.reset_password(req).await?;
    Ok(Json(MessageResponse {
        message: "password updated".to_string(),
    }))
}

/// POST /auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state.accounts.change_password(req).await?;
    Ok(Json(MessageResponse {
        message: "password updated".to_string(),
    }))
}
