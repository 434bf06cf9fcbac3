use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    Sms,
    Email,
}

/// Second-factor configuration attached to an auth record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwoFactorConfig {
    #[serde(default)]
    pub enabled: bool,
    pub method: Option<TwoFactorMethod>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    /// Base32-encoded shared secret, present when `method` is TOTP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
}

/// Email/password credential payload. The salt is fixed for the record's
/// lifetime so history entries stay comparable against recomputed hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAuth {
    pub email: String,
    pub is_email_confirmed: bool,
    pub password_expires_at: NaiveDate,
    pub password_hash: String,
    pub password_salt: String,
    #[serde(default)]
    pub password_history: Vec<String>,
}

/// Directory-bound credential: the password lives in the directory, only
/// the mapping is stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryAuth {
    pub ldap_domain_id: String,
    pub directory_username: String,
}

/// Federated (KAU) identity mapping established out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KauAuth {
    pub external_user_id: String,
    pub legal_name: String,
    pub email: String,
}

/// Certificate identity established at CSR-signing time. `is_revoked` is
/// monotonic: once set it is never cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateAuth {
    pub thumbprint: String,
    pub serial_number: String,
    pub issuer: String,
    pub subject: String,
    pub public_key_hash: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub is_revoked: bool,
    pub revocation_reason: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CertificateAuth {
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && now <= self.valid_until
    }
}

/// The four authentication methods as an exhaustively matched sum type;
/// each variant carries only its own fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    Email(EmailAuth),
    ActiveDirectory(DirectoryAuth),
    Kau(KauAuth),
    Certificate(CertificateAuth),
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Email(_) => "email",
            AuthMethod::ActiveDirectory(_) => "active_directory",
            AuthMethod::Kau(_) => "kau",
            AuthMethod::Certificate(_) => "certificate",
        }
    }

    /// Natural key identifying this credential within its method; stores
    /// enforce uniqueness of this key over the active record set.
    pub fn natural_key(&self) -> String {
        match self {
            AuthMethod::Email(e) => format!("email:{}", e.email.to_lowercase()),
            AuthMethod::ActiveDirectory(d) => format!(
                "ad:{}:{}",
                d.ldap_domain_id,
                d.directory_username.to_lowercase()
            ),
            AuthMethod::Kau(k) => format!("kau:{}", k.external_user_id),
            AuthMethod::Certificate(c) => format!("cert:{}", c.thumbprint.to_lowercase()),
        }
    }
}

/// Versioned auth record owned by exactly one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    pub id: String,
    pub etag: String,
    pub last_update: DateTime<Utc>,
    pub account_id: String,
    pub is_active: bool,
    #[serde(default)]
    pub two_factor: TwoFactorConfig,
    #[serde(flatten)]
    pub method: AuthMethod,
}

impl AuthRecord {
    pub fn new(account_id: String, method: AuthMethod) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            etag: super::new_etag(),
            last_update: Utc::now(),
            account_id,
            is_active: true,
            two_factor: TwoFactorConfig::default(),
            method,
        }
    }
}
