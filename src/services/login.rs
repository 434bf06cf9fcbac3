//! Login state machine.
//!
//! `Unauthenticated → MethodVerified → (TwoFactorPending →) Authenticated`,
//! or a terminal failure. Each method verifies its own credential shape,
//! then every path funnels through the same two-factor gate and produces
//! the same uniform outcome value. Authentication failures are values, not
//! errors; `Err` is reserved for infrastructure problems.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;

use super::collaborators::{Directory, FederatedIdentityProvider};
use super::password::{verify_password, Password};
use super::tokens::TokenIssuer;
use super::two_factor::{TwoFactorService, TwoFactorVerdict};
use super::ServiceError;
use crate::models::{Account, AuthMethod, AuthRecord, TokenPair};
use crate::store::IdentityStore;

const STATE_TTL_MINUTES: i64 = 10;
const STATE_NONCE_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Ok,
    TwoFactorRequired,
    InvalidCredentials,
    AccountInactive,
    EmailNotConfirmed,
    PasswordExpired,
    DomainNotSpecified,
    DomainNotRegistered,
    DomainUserNotRegistered,
    FederatedTokenError,
    FederatedUserNotFound,
    CertificateNotRegistered,
    CertificateRevoked,
    CertificateExpired,
    InvalidOrExpiredToken,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::Ok => "ok",
            LoginStatus::TwoFactorRequired => "two_factor_required",
            LoginStatus::InvalidCredentials => "invalid_credentials",
            LoginStatus::AccountInactive => "account_inactive",
            LoginStatus::EmailNotConfirmed => "email_not_confirmed",
            LoginStatus::PasswordExpired => "password_expired",
            LoginStatus::DomainNotSpecified => "domain_not_specified",
            LoginStatus::DomainNotRegistered => "domain_not_registered",
            LoginStatus::DomainUserNotRegistered => "domain_user_not_registered",
            LoginStatus::FederatedTokenError => "federated_token_error",
            LoginStatus::FederatedUserNotFound => "federated_user_not_found",
            LoginStatus::CertificateNotRegistered => "certificate_not_registered",
            LoginStatus::CertificateRevoked => "certificate_revoked",
            LoginStatus::CertificateExpired => "certificate_expired",
            LoginStatus::InvalidOrExpiredToken => "invalid_or_expired_token",
        }
    }
}

/// Uniform terminal result of every login path.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub status: LoginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    pub requires_two_factor: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
}

impl LoginOutcome {
    fn failed(status: LoginStatus) -> Self {
        Self {
            status,
            account_id: None,
            account_name: None,
            requires_two_factor: false,
            challenge_id: None,
            tokens: None,
        }
    }

    fn two_factor_pending(account: &Account, challenge_id: String) -> Self {
        Self {
            status: LoginStatus::TwoFactorRequired,
            account_id: Some(account.id.clone()),
            account_name: Some(account.name.clone()),
            requires_two_factor: true,
            challenge_id: Some(challenge_id),
            tokens: None,
        }
    }

    fn authenticated(account: &Account, tokens: TokenPair) -> Self {
        Self {
            status: LoginStatus::Ok,
            account_id: Some(account.id.clone()),
            account_name: Some(account.name.clone()),
            requires_two_factor: false,
            challenge_id: None,
            tokens: Some(tokens),
        }
    }

    /// Retryable two-factor rejection: the pending state is kept.
    fn two_factor_rejected(challenge_id: String) -> Self {
        Self {
            status: LoginStatus::InvalidCredentials,
            account_id: None,
            account_name: None,
            requires_two_factor: true,
            challenge_id: Some(challenge_id),
            tokens: None,
        }
    }
}

#[derive(Clone)]
pub struct LoginService {
    store: Arc<dyn IdentityStore>,
    tokens: TokenIssuer,
    two_factor: TwoFactorService,
    directory: Arc<dyn Directory>,
    idp: Arc<dyn FederatedIdentityProvider>,
    state_secret: Vec<u8>,
}

impl LoginService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        tokens: TokenIssuer,
        two_factor: TwoFactorService,
        directory: Arc<dyn Directory>,
        idp: Arc<dyn FederatedIdentityProvider>,
        state_secret: Vec<u8>,
    ) -> Self {
        Self {
            store,
            tokens,
            two_factor,
            directory,
            idp,
            state_secret,
        }
    }

    /// Email/password verification.
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome, ServiceError> {
        let key = format!("email:{}", email.to_lowercase());
        let auth = match self.store.find_auth_by_natural_key(&key).await? {
            Some(a) => a,
            None => return Ok(LoginOutcome::failed(LoginStatus::InvalidCredentials)),
        };
        let account = match self.active_account(&auth).await? {
            Ok(account) => account,
            Err(outcome) => return Ok(outcome),
        };

        let email_auth = match &auth.method {
            AuthMethod::Email(e) => e,
            _ => return Ok(LoginOutcome::failed(LoginStatus::InvalidCredentials)),
        };

        let matches = verify_password(
            &Password::new(password.to_string()),
            &email_auth.password_salt,
            &email_auth.password_hash,
        )?;
        if !matches {
            tracing::debug!(account_id = %account.id, "password mismatch");
            return Ok(LoginOutcome::failed(LoginStatus::InvalidCredentials));
        }
        if !email_auth.is_email_confirmed {
            return Ok(LoginOutcome::failed(LoginStatus::EmailNotConfirmed));
        }
        if email_auth.password_expires_at < Utc::now().date_naive() {
            return Ok(LoginOutcome::failed(LoginStatus::PasswordExpired));
        }

        self.gate(&account, &auth).await
    }

    /// Directory-bound verification: resolve the domain, bind through the
    /// directory collaborator, then map the resolved user onto a local
    /// auth record.
    pub async fn login_with_directory(
        &self,
        domain_identifier: Option<&str>,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, ServiceError> {
        let identifier = match domain_identifier {
            Some(d) if !d.trim().is_empty() => d.trim(),
            _ => return Ok(LoginOutcome::failed(LoginStatus::DomainNotSpecified)),
        };
        let domain = match self.store.find_domain_by_identifier(identifier).await? {
            Some(d) => d,
            None => return Ok(LoginOutcome::failed(LoginStatus::DomainNotRegistered)),
        };

        let resolved = self
            .directory
            .authenticate(&domain, username, password)
            .await
            .map_err(|e| ServiceError::Collaborator(e.to_string()))?;
        let user = match resolved {
            Some(u) => u,
            None => return Ok(LoginOutcome::failed(LoginStatus::InvalidCredentials)),
        };

        let key = format!("ad:{}:{}", domain.id, user.username.to_lowercase());
        let auth = match self.store.find_auth_by_natural_key(&key).await? {
            Some(a) => a,
            None => return Ok(LoginOutcome::failed(LoginStatus::DomainUserNotRegistered)),
        };
        let account = match self.active_account(&auth).await? {
            Ok(account) => account,
            Err(outcome) => return Ok(outcome),
        };

        self.gate(&account, &auth).await
    }

    /// Authorization redirect for the federated provider, embedding an
    /// unguessable state value bound to the caller's return URL.
    pub fn federated_login_url(&self, return_url: &str) -> Result<String, ServiceError> {
        if return_url.trim().is_empty() {
            return Err(ServiceError::Validation("return_url is required".to_string()));
        }
        let state = make_state(&self.state_secret, return_url);
        Ok(self.idp.authorize_url(&state))
    }

    /// Callback half of the federated flow. An invalid or expired state
    /// fails closed with an error; with a valid state the login outcome
    /// (success or failure) is returned together with the bound return
    /// URL so the transport can redirect.
    pub async fn federated_callback(
        &self,
        code: &str,
        state: &str,
    ) -> Result<(LoginOutcome, String), ServiceError> {
        let return_url = parse_state(&self.state_secret, state)
            .ok_or_else(|| ServiceError::Validation("invalid or expired state".to_string()))?;

        let claims = match self.idp.exchange(code).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "federated code exchange failed");
                return Ok((LoginOutcome::failed(LoginStatus::FederatedTokenError), return_url));
            }
        };

        let key = format!("kau:{}", claims.external_user_id);
        let auth = match self.store.find_auth_by_natural_key(&key).await? {
            Some(a) => a,
            None => {
                return Ok((
                    LoginOutcome::failed(LoginStatus::FederatedUserNotFound),
                    return_url,
                ))
            }
        };
        let account = match self.active_account(&auth).await? {
            Ok(account) => account,
            Err(outcome) => return Ok((outcome, return_url)),
        };

        Ok((self.gate(&account, &auth).await?, return_url))
    }

    /// Certificate verification. The TLS terminator has already validated
    /// the chain and signature; what remains here is mapping the presented
    /// thumbprint onto a registered credential and checking revocation and
    /// the validity window.
    pub async fn login_with_certificate(
        &self,
        thumbprint: &str,
    ) -> Result<LoginOutcome, ServiceError> {
        let key = format!("cert:{}", thumbprint.to_lowercase());
        let auth = match self.store.find_auth_by_natural_key(&key).await? {
            Some(a) => a,
            None => return Ok(LoginOutcome::failed(LoginStatus::CertificateNotRegistered)),
        };
        let cert = match &auth.method {
            AuthMethod::Certificate(c) => c,
            _ => return Ok(LoginOutcome::failed(LoginStatus::CertificateNotRegistered)),
        };
        if cert.is_revoked {
            tracing::warn!(auth_id = %auth.id, "login attempt with revoked certificate");
            return Ok(LoginOutcome::failed(LoginStatus::CertificateRevoked));
        }
        if !cert.is_within_validity(Utc::now()) {
            return Ok(LoginOutcome::failed(LoginStatus::CertificateExpired));
        }
        let account = match self.active_account(&auth).await? {
            Ok(account) => account,
            Err(outcome) => return Ok(outcome),
        };

        self.gate(&account, &auth).await
    }

    /// `TwoFactorPending → Authenticated` transition. A wrong code keeps
    /// the pending state and permits retry; an exhausted or expired
    /// challenge terminates the login.
    pub async fn verify_two_factor(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<LoginOutcome, ServiceError> {
        match self.two_factor.verify(challenge_id, code).await? {
            TwoFactorVerdict::Accepted { account_id, .. } => {
                let account = self
                    .store
                    .get_account(&account_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("account not found".to_string()))?;
                if !account.is_active {
                    return Ok(LoginOutcome::failed(LoginStatus::AccountInactive));
                }
                let tokens = self.tokens.issue(&account.id).await?;
                tracing::info!(account_id = %account.id, "two-factor login completed");
                Ok(LoginOutcome::authenticated(&account, tokens))
            }
            TwoFactorVerdict::Rejected => {
                Ok(LoginOutcome::two_factor_rejected(challenge_id.to_string()))
            }
            TwoFactorVerdict::Expired => {
                Ok(LoginOutcome::failed(LoginStatus::InvalidOrExpiredToken))
            }
        }
    }

    /// Rotate a refresh token into a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        self.tokens.rotate(refresh_token).await
    }

    async fn active_account(
        &self,
        auth: &AuthRecord,
    ) -> Result<Result<Account, LoginOutcome>, ServiceError> {
        let account = self
            .store
            .get_account(&auth.account_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("auth {} has no account", auth.id))
            })?;
        if !account.is_active || !auth.is_active {
            return Ok(Err(LoginOutcome::failed(LoginStatus::AccountInactive)));
        }
        Ok(Ok(account))
    }

    /// Two-factor gate applied after any successful method verification.
    async fn gate(&self, account: &Account, auth: &AuthRecord) -> Result<LoginOutcome, ServiceError> {
        if auth.two_factor.enabled {
            let challenge = self.two_factor.begin(auth).await?;
            tracing::info!(account_id = %account.id, "login pending second factor");
            return Ok(LoginOutcome::two_factor_pending(account, challenge.id));
        }
        let tokens = self.tokens.issue(&account.id).await?;
        tracing::info!(account_id = %account.id, method = auth.method.name(), "login succeeded");
        Ok(LoginOutcome::authenticated(account, tokens))
    }
}

/// Build the opaque CSRF-resistant state value:
/// `base64url(nonce ‖ expiry ‖ return_url ‖ hmac)`.
fn make_state(secret: &[u8], return_url: &str) -> String {
    let mut payload = Vec::with_capacity(STATE_NONCE_LEN + 8 + return_url.len());
    let mut nonce = [0u8; STATE_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    payload.extend_from_slice(&nonce);
    let expiry = (Utc::now() + Duration::minutes(STATE_TTL_MINUTES)).timestamp();
    payload.extend_from_slice(&expiry.to_be_bytes());
    payload.extend_from_slice(return_url.as_bytes());

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&payload);
    payload.extend_from_slice(&mac.finalize().into_bytes());

    URL_SAFE_NO_PAD.encode(payload)
}

/// Verify a state value and recover the bound return URL.
fn parse_state(secret: &[u8], state: &str) -> Option<String> {
    let raw = URL_SAFE_NO_PAD.decode(state).ok()?;
    if raw.len() < STATE_NONCE_LEN + 8 + 32 {
        return None;
    }
    let (payload, tag) = raw.split_at(raw.len() - 32);

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.verify_slice(tag).ok()?;

    let expiry = i64::from_be_bytes(payload[STATE_NONCE_LEN..STATE_NONCE_LEN + 8].try_into().ok()?);
    if expiry < Utc::now().timestamp() {
        return None;
    }
    String::from_utf8(payload[STATE_NONCE_LEN + 8..].to_vec()).ok()
}
