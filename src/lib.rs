pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::IdentityConfig;
use crate::services::{
    AccountService, AuditRecorder, CertificateService, LoginService, ServiceError, TokenIssuer,
};
use crate::store::IdentityStore;

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn IdentityStore>,
    pub accounts: AccountService,
    pub login: LoginService,
    pub certificates: CertificateService,
    pub tokens: TokenIssuer,
    pub audit: AuditRecorder,
}

pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/login/directory", post(handlers::auth::login_directory))
        .route(
            "/auth/login/certificate",
            post(handlers::auth::login_certificate),
        )
        .route(
            "/auth/two-factor/verify",
            post(handlers::auth::verify_two_factor),
        )
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/confirm-email", get(handlers::auth::confirm_email))
        .route("/auth/forgot-password", post(handlers::auth::forgot_password))
        .route("/auth/reset-password", post(handlers::auth::reset_password))
        .route("/auth/change-password", post(handlers::auth::change_password))
        .route(
            "/auth/federated/login-url",
            get(handlers::federated::login_url),
        )
        .route(
            "/auth/federated/callback",
            get(handlers::federated::callback),
        );

    let admin_routes = Router::new()
        .route("/admin/accounts", post(handlers::admin::create_account))
        .route(
            "/admin/accounts/:id",
            get(handlers::admin::get_account).put(handlers::admin::update_account),
        )
        .route(
            "/admin/accounts/:id/auths",
            get(handlers::admin::list_auths),
        )
        .route(
            "/admin/accounts/:id/auths/email",
            post(handlers::admin::create_email_auth),
        )
        .route(
            "/admin/accounts/:id/auths/directory",
            post(handlers::admin::create_directory_auth),
        )
        .route(
            "/admin/accounts/:id/auths/kau",
            post(handlers::admin::create_kau_auth),
        )
        .route(
            "/admin/auths/:id",
            get(handlers::admin::get_auth).put(handlers::admin::update_auth),
        )
        .route(
            "/admin/auths/:id/revoke-certificate",
            post(handlers::admin::revoke_certificate),
        )
        .route(
            "/admin/certificates",
            post(handlers::admin::issue_certificate),
        )
        .route(
            "/admin/domains",
            get(handlers::admin::list_domains).post(handlers::admin::create_domain),
        )
        .route(
            "/admin/domains/:id",
            get(handlers::admin::get_domain).put(handlers::admin::update_domain),
        )
        .route(
            "/admin/audit/:entity_kind/:entity_id",
            get(handlers::admin::audit_history),
        );

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-actor-id"),
            header::HeaderName::from_static("x-actor-name"),
        ]);

    Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Service health check.
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
    })))
}
