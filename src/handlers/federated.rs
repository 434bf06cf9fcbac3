//! Federated (KAU) login transport: hand out the provider's authorization
//! URL, then turn the callback into a redirect back to the caller's bound
//! return URL.

use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};

use crate::dtos::auth::{FederatedCallbackQuery, FederatedLoginUrlQuery, LoginUrlResponse};
use crate::services::{LoginOutcome, ServiceError};
use crate::AppState;

/// GET /auth/federated/login-url?return_url=...
pub async fn login_url(
    State(state): State<AppState>,
    Query(query): Query<FederatedLoginUrlQuery>,
) -> Result<Json<LoginUrlResponse>, ServiceError> {
    let login_url = state.login.federated_login_url(&query.return_url)?;
    Ok(Json(LoginUrlResponse { login_url }))
}

/// GET /auth/federated/callback?code=...&state=...
///
/// A missing or tampered state fails closed as a 400 before any redirect.
/// With a valid state the outcome, success or failure, is delivered to the
/// bound return URL as query parameters.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<FederatedCallbackQuery>,
) -> Result<Redirect, ServiceError> {
    let (outcome, return_url) = state
        .login
        .federated_callback(&query.code, &query.state)
        .await?;
    Ok(Redirect::to(&redirect_target(&return_url, &outcome)))
}

fn redirect_target(return_url: &str, outcome: &LoginOutcome) -> String {
    let separator = if return_url.contains('?') { '&' } else { '?' };
    let mut target = format!(
        "{}{}status={}",
        return_url,
        separator,
        urlencoding::encode(outcome.status.as_str())
    );
    if let Some(challenge_id) = &outcome.challenge_id {
        target.push_str(&format!("&challenge_id={}", urlencoding::encode(challenge_id)));
    }
    if let Some(tokens) = &outcome.tokens {
        target.push_str(&format!(
            "&access_token={}&refresh_token={}",
            urlencoding::encode(&tokens.access_token),
            urlencoding::encode(&tokens.refresh_token)
        ));
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LoginStatus;

    fn failed(status: LoginStatus) -> LoginOutcome {
        LoginOutcome {
            status,
            account_id: None,
            account_name: None,
            requires_two_factor: false,
            challenge_id: None,
            tokens: None,
        }
    }

    #[test]
    fn failure_redirect_carries_only_the_status() {
        let target = redirect_target(
            "https://app.example.test/done",
            &failed(LoginStatus::FederatedUserNotFound),
        );
        assert_eq!(
            target,
            "https://app.example.test/done?status=federated_user_not_found"
        );
    }

    #[test]
    fn existing_query_string_is_extended_not_replaced() {
        let target = redirect_target(
            "https://app.example.test/done?tab=1",
            &failed(LoginStatus::FederatedTokenError),
        );
        assert!(target.starts_with("https://app.example.test/done?tab=1&status="));
    }
}
