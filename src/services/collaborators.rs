//! Abstract contracts for the external systems this core consults, plus
//! in-process mocks used by the dev binary and the tests. Production
//! deployments supply their own implementations behind the same traits.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::models::LdapDomain;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

/// Outbound email/SMS delivery.
#[async_trait]
pub trait Communicator: Send + Sync {
    async fn send_email(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), CollaboratorError>;

    async fn send_sms(&self, phone_number: &str, body: &str) -> Result<(), CollaboratorError>;
}

/// Certificate metadata returned by the certificate authority after
/// signing; the CA collaborator owns certificate parsing.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub thumbprint: String,
    pub serial_number: String,
    pub issuer: String,
    pub subject: String,
    pub public_key_hash: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn sign_csr(
        &self,
        csr_pem: &str,
        profile: &str,
    ) -> Result<IssuedCertificate, CollaboratorError>;

    async fn revoke(&self, serial_number: &str, reason: &str) -> Result<(), CollaboratorError>;
}

/// Claims returned by the federated identity provider after a successful
/// authorization-code exchange.
#[derive(Debug, Clone)]
pub struct FederatedClaims {
    pub external_user_id: String,
    pub email: String,
    pub legal_name: String,
}

#[async_trait]
pub trait FederatedIdentityProvider: Send + Sync {
    /// Authorization redirect target embedding the opaque state value.
    fn authorize_url(&self, state: &str) -> String;

    async fn exchange(&self, code: &str) -> Result<FederatedClaims, CollaboratorError>;
}

/// User resolved by a successful directory bind.
#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub username: String,
    pub display_name: String,
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Bind against the domain's controllers with the caller's credentials.
    /// `Ok(None)` means the directory rejected the credentials; `Err` is an
    /// infrastructure failure.
    async fn authenticate(
        &self,
        domain: &LdapDomain,
        username: &str,
        password: &str,
    ) -> Result<Option<DirectoryUser>, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SentSms {
    pub phone_number: String,
    pub body: String,
}

/// Records outbound messages instead of delivering them.
#[derive(Default)]
pub struct MockCommunicator {
    pub emails: Mutex<Vec<SentEmail>>,
    pub sms: Mutex<Vec<SentSms>>,
}

impl MockCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_email(&self) -> Option<SentEmail> {
        self.emails.lock().unwrap().last().cloned()
    }

    pub fn last_sms(&self) -> Option<SentSms> {
        self.sms.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Communicator for MockCommunicator {
    async fn send_email(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), CollaboratorError> {
        self.emails.lock().unwrap().push(SentEmail {
            subject: subject.to_string(),
            body: body.to_string(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }

    async fn send_sms(&self, phone_number: &str, body: &str) -> Result<(), CollaboratorError> {
        self.sms.lock().unwrap().push(SentSms {
            phone_number: phone_number.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Deterministic in-process CA: certificate fields are derived from the CSR
/// digest. `fail` simulates an unavailable authority.
#[derive(Default)]
pub struct MockCertificateAuthority {
    pub fail: std::sync::atomic::AtomicBool,
}

impl MockCertificateAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl CertificateAuthority for MockCertificateAuthority {
    async fn sign_csr(
        &self,
        csr_pem: &str,
        profile: &str,
    ) -> Result<IssuedCertificate, CollaboratorError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CollaboratorError("certificate authority unavailable".to_string()));
        }

        let digest = hex::encode(Sha256::digest(csr_pem.as_bytes()));
        let now = Utc::now();
        Ok(IssuedCertificate {
            certificate_pem: format!("-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----", digest),
            thumbprint: digest[..40].to_string(),
            serial_number: digest[40..56].to_string(),
            issuer: "CN=Mock Issuing CA".to_string(),
            subject: format!("CN={}", profile),
            public_key_hash: digest[..64].to_string(),
            valid_from: now,
            valid_until: now + Duration::days(365),
        })
    }

    async fn revoke(&self, _serial_number: &str, _reason: &str) -> Result<(), CollaboratorError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CollaboratorError("certificate authority unavailable".to_string()));
        }
        Ok(())
    }
}

/// Identity provider mock with a fixed code→claims table.
#[derive(Default)]
pub struct MockIdentityProvider {
    codes: Mutex<HashMap<String, FederatedClaims>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_code(&self, code: &str, claims: FederatedClaims) {
        self.codes.lock().unwrap().insert(code.to_string(), claims);
    }
}

#[async_trait]
impl FederatedIdentityProvider for MockIdentityProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "https://idp.example.test/authorize?response_type=code&state={}",
            urlencoding::encode(state)
        )
    }

    async fn exchange(&self, code: &str) -> Result<FederatedClaims, CollaboratorError> {
        self.codes
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| CollaboratorError("code exchange rejected".to_string()))
    }
}

/// Directory mock accepting a configured (domain, username, password) set.
#[derive(Default)]
pub struct MockDirectory {
    users: Mutex<HashMap<(String, String), String>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_user(&self, domain_name: &str, username: &str, password: &str) {
        self.users.lock().unwrap().insert(
            (domain_name.to_lowercase(), username.to_lowercase()),
            password.to_string(),
        );
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn authenticate(
        &self,
        domain: &LdapDomain,
        username: &str,
        password: &str,
    ) -> Result<Option<DirectoryUser>, CollaboratorError> {
        if domain.domain_controllers.is_empty() {
            return Err(CollaboratorError("no domain controllers registered".to_string()));
        }
        let users = self.users.lock().unwrap();
        let key = (domain.name.to_lowercase(), username.to_lowercase());
        match users.get(&key) {
            Some(stored) if stored == password => Ok(Some(DirectoryUser {
                username: username.to_lowercase(),
                display_name: username.to_string(),
            })),
            _ => Ok(None),
        }
    }
}
