//! Administrative handlers: account, auth record and directory-domain
//! management, certificate lifecycle, and audit-history reads.

use axum::{
    extract::{Json, Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::Serialize;

use crate::dtos::admin::{
    CreateAccountRequest, CreateDirectoryAuthRequest, CreateDomainRequest,
    CreateEmailAuthRequest, CreateKauAuthRequest, IssueCertificateRequest,
    RevokeCertificateRequest, UpdateAccountRequest, UpdateAuthRequest, UpdateDomainRequest,
};
use crate::models::{Account, AuditTrailEntry, AuthRecord, EntityKind, LdapDomain};
use crate::services::{audit, RequestContext, ServiceError};
use crate::AppState;

/// Caller identity propagated by the fronting gateway; absent headers fall
/// back to the system identity.
fn actor_context(headers: &HeaderMap) -> RequestContext {
    let actor_id = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    let actor_name = headers
        .get("x-actor-name")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    match (actor_id, actor_name) {
        (Some(id), Some(name)) => RequestContext::new(id, name),
        (Some(id), None) => RequestContext::new(id, id),
        _ => RequestContext::system(),
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// POST /admin/accounts
pub async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), ServiceError> {
    let ctx = actor_context(&headers);
    let account = state.accounts.create_account(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /admin/accounts/{id}
pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Account>, ServiceError> {
    Ok(Json(state.accounts.get_account(&id).await?))
}

/// PUT /admin/accounts/{id}
pub async fn update_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Json<Account>, ServiceError> {
    let ctx = actor_context(&headers);
    Ok(Json(state.accounts.update_account(&ctx, &id, req).await?))
}

// ---------------------------------------------------------------------------
// Auth records
// ---------------------------------------------------------------------------

/// POST /admin/accounts/{id}/auths/email
pub async fn create_email_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CreateEmailAuthRequest>,
) -> Result<(StatusCode, Json<AuthRecord>), ServiceError> {
    let ctx = actor_context(&headers);
    let auth = state.accounts.create_email_auth(&ctx, &id, req).await?;
    Ok((StatusCode::CREATED, Json(auth)))
}

/// POST /admin/accounts/{id}/auths/directory
pub async fn create_directory_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CreateDirectoryAuthRequest>,
) -> Result<(StatusCode, Json<AuthRecord>), ServiceError> {
    let ctx = actor_context(&headers);
    let auth = state.accounts.create_directory_auth(&ctx, &id, req).await?;
    Ok((StatusCode::CREATED, Json(auth)))
}

/// POST /admin/accounts/{id}/auths/kau
pub async fn create_kau_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CreateKauAuthRequest>,
) -> Result<(StatusCode, Json<AuthRecord>), ServiceError> {
    let ctx = actor_context(&headers);
    let auth = state.accounts.create_kau_auth(&ctx, &id, req).await?;
    Ok((StatusCode::CREATED, Json(auth)))
}

/// GET /admin/accounts/{id}/auths
pub async fn list_auths(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuthRecord>>, ServiceError> {
    Ok(Json(state.accounts.list_auths(&id).await?))
}

/// GET /admin/auths/{id}
pub async fn get_auth(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuthRecord>, ServiceError> {
    Ok(Json(state.accounts.get_auth(&id).await?))
}

/// PUT /admin/auths/{id}
pub async fn update_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateAuthRequest>,
) -> Result<Json<AuthRecord>, ServiceError> {
    let ctx = actor_context(&headers);
    Ok(Json(state.accounts.update_auth(&ctx, &id, req).await?))
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct IssuedCertificateResponse {
    pub auth: AuthRecord,
    pub certificate_pem: String,
}

/// POST /admin/certificates
pub async fn issue_certificate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IssueCertificateRequest>,
) -> Result<(StatusCode, Json<IssuedCertificateResponse>), ServiceError> {
    let ctx = actor_context(&headers);
    let issued = state.certificates.issue(&ctx, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(IssuedCertificateResponse {
            auth: issued.auth,
            certificate_pem: issued.certificate_pem,
        }),
    ))
}

/// POST /admin/auths/{id}/revoke-certificate
pub async fn revoke_certificate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RevokeCertificateRequest>,
) -> Result<Json<AuthRecord>, ServiceError> {
    let ctx = actor_context(&headers);
    Ok(Json(state.certificates.revoke(&ctx, &id, req).await?))
}

// ---------------------------------------------------------------------------
// Directory domains
// ---------------------------------------------------------------------------

/// POST /admin/domains
pub async fn create_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<LdapDomain>), ServiceError> {
    let ctx = actor_context(&headers);
    let domain = state.accounts.create_domain(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(domain)))
}

/// GET /admin/domains
pub async fn list_domains(
    State(state): State<AppState>,
) -> Result<Json<Vec<LdapDomain>>, ServiceError> {
    Ok(Json(state.accounts.list_domains().await?))
}

/// GET /admin/domains/{id}
pub async fn get_domain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LdapDomain>, ServiceError> {
    Ok(Json(state.accounts.get_domain(&id).await?))
}

/// PUT /admin/domains/{id}
pub async fn update_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateDomainRequest>,
) -> Result<Json<LdapDomain>, ServiceError> {
    let ctx = actor_context(&headers);
    Ok(Json(state.accounts.update_domain(&ctx, &id, req).await?))
}

// ---------------------------------------------------------------------------
// Audit history
// ---------------------------------------------------------------------------

/// GET /admin/audit/{entity_kind}/{entity_id}
///
/// Walks the back-linked chain from the entity's newest entry; the response
/// is ordered newest first.
pub async fn audit_history(
    State(state): State<AppState>,
    Path((entity_kind, entity_id)): Path<(String, String)>,
) -> Result<Json<Vec<AuditTrailEntry>>, ServiceError> {
    let kind: EntityKind = entity_kind
        .parse()
        .map_err(ServiceError::Validation)?;
    let entries = audit::history(state.store.as_ref(), kind, &entity_id).await?;
    Ok(Json(entries))
}
