//! Test helper module for the identity-service integration tests.
//!
//! Builds the full application against the in-process store and mock
//! collaborators, and drives the router directly without a socket.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use identity_service::config::{Environment, IdentityConfig, JwtConfig};
use identity_service::services::{
    AccountService, AuditRecorder, CertificateService, LoginService, MockCertificateAuthority,
    MockCommunicator, MockDirectory, MockIdentityProvider, TokenIssuer, TwoFactorService,
};
use identity_service::store::{IdentityStore, MemoryStore};
use identity_service::{build_router, AppState};

pub const TEST_BASE_URL: &str = "http://localhost:3000";
pub const TEST_STATE_SECRET: &str = "test-state-secret";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<dyn IdentityStore>,
    pub communicator: Arc<MockCommunicator>,
    pub ca: Arc<MockCertificateAuthority>,
    pub idp: Arc<MockIdentityProvider>,
    pub directory: Arc<MockDirectory>,
}

impl TestApp {
    pub fn spawn() -> Self {
        let config = test_config();
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let communicator = Arc::new(MockCommunicator::new());
        let ca = Arc::new(MockCertificateAuthority::new());
        let idp = Arc::new(MockIdentityProvider::new());
        let directory = Arc::new(MockDirectory::new());

        let (audit, _task) = AuditRecorder::spawn(store.clone());
        let tokens = TokenIssuer::new(
            store.clone(),
            config.jwt.secret.as_bytes(),
            config.jwt.access_token_expiry_minutes,
            config.jwt.refresh_token_expiry_days,
        );
        let two_factor = TwoFactorService::new(store.clone(), communicator.clone());

        let state = AppState {
            config: config.clone(),
            store: store.clone(),
            accounts: AccountService::new(
                store.clone(),
                audit.clone(),
                communicator.clone(),
                tokens.clone(),
                config.base_url.clone(),
            ),
            login: LoginService::new(
                store.clone(),
                tokens.clone(),
                two_factor,
                directory.clone(),
                idp.clone(),
                TEST_STATE_SECRET.as_bytes().to_vec(),
            ),
            certificates: CertificateService::new(store.clone(), ca.clone(), audit.clone()),
            tokens,
            audit,
        };

        Self {
            router: build_router(state.clone()),
            state,
            store,
            communicator,
            ca,
            idp,
            directory,
        }
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build failed");
        self.send(request).await
    }

    pub async fn put_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("PUT")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build failed");
        self.send(request).await
    }

    pub async fn get(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("request build failed");
        self.send(request).await
    }

    /// GET without body decoding, for redirect responses.
    pub async fn get_raw(&self, path: &str) -> (StatusCode, Option<String>) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("request build failed");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router failed");
        let status = response.status();
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        (status, location)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body read failed")
            .to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("non-JSON response body")
        };
        (status, value)
    }

    /// Wait for every queued audit entry to hit the store.
    pub async fn flush_audit(&self) {
        self.state.audit.flush().await;
    }

    // -----------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------

    pub async fn create_user_account(&self, name: &str) -> serde_json::Value {
        let (status, account) = self
            .post_json(
                "/admin/accounts",
                serde_json::json!({ "name": name, "account_type": "user" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "account fixture: {}", account);
        account
    }

    pub async fn create_email_auth(
        &self,
        account_id: &str,
        email: &str,
        password: &str,
    ) -> serde_json::Value {
        let (status, auth) = self
            .post_json(
                &format!("/admin/accounts/{}/auths/email", account_id),
                serde_json::json!({ "email": email, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "email auth fixture: {}", auth);
        auth
    }

    /// Pull the confirmation token out of the last mailed link and redeem it.
    pub async fn confirm_last_email(&self) {
        let mail = self
            .communicator
            .last_email()
            .expect("no confirmation mail recorded");
        let token = mail
            .body
            .split("token=")
            .nth(1)
            .expect("no token in mail body");
        let (status, body) = self.get(&format!("/auth/confirm-email?token={}", token)).await;
        assert_eq!(status, StatusCode::OK, "confirm email: {}", body);
    }

    /// Full email/password fixture: account + confirmed credential.
    pub async fn registered_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> (serde_json::Value, serde_json::Value) {
        let account = self.create_user_account(name).await;
        let auth = self
            .create_email_auth(account["id"].as_str().unwrap(), email, password)
            .await;
        self.confirm_last_email().await;
        (account, auth)
    }
}

fn test_config() -> IdentityConfig {
    IdentityConfig {
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "warn".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        base_url: TEST_BASE_URL.to_string(),
        jwt: JwtConfig {
            secret: "test-jwt-secret".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        federated_state_secret: TEST_STATE_SECRET.to_string(),
        allowed_origins: vec![TEST_BASE_URL.to_string()],
    }
}
