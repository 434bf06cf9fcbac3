use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TwoFactorMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailConfirmation,
    PasswordReset,
}

/// One-shot link token mailed out for email confirmation or password reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationToken {
    pub id: String,
    pub token: String,
    pub auth_id: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl VerificationToken {
    pub fn new_email_confirmation(auth_id: String, token: String) -> Self {
        Self::new(auth_id, token, TokenPurpose::EmailConfirmation, Duration::hours(24))
    }

    pub fn new_password_reset(auth_id: String, token: String) -> Self {
        Self::new(auth_id, token, TokenPurpose::PasswordReset, Duration::hours(1))
    }

    fn new(auth_id: String, token: String, purpose: TokenPurpose, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            token,
            auth_id,
            purpose,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Pending second-factor challenge created after primary verification
/// succeeds. SMS/Email challenges hold the hash of the delivered one-time
/// code; TOTP challenges verify against the auth record's shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorChallenge {
    pub id: String,
    pub auth_id: String,
    pub account_id: String,
    pub method: TwoFactorMethod,
    pub code_hash: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl TwoFactorChallenge {
    pub fn new(
        auth_id: String,
        account_id: String,
        method: TwoFactorMethod,
        code_hash: Option<String>,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            auth_id,
            account_id,
            method,
            code_hash,
            expires_at: now + Duration::seconds(ttl_seconds),
            attempts: 0,
            created_at: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}
