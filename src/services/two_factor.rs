//! Second-factor challenge handling: TOTP against a per-auth shared
//! secret, or one-time codes delivered over SMS/email.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};

use super::collaborators::Communicator;
use super::password::hashes_equal;
use super::ServiceError;
use crate::models::{AuthRecord, TwoFactorChallenge, TwoFactorMethod};
use crate::store::{IdentityStore, StoreError};

pub const OTP_LENGTH: usize = 6;
pub const OTP_EXPIRY_SECONDS: i64 = 300;
pub const OTP_MAX_ATTEMPTS: u32 = 5;

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;
const TOTP_ISSUER: &str = "identity-service";

/// Outcome of a challenge verification attempt.
#[derive(Debug)]
pub enum TwoFactorVerdict {
    Accepted { account_id: String, auth_id: String },
    /// Wrong code; the challenge stays open and may be retried.
    Rejected,
    /// Challenge expired or attempts exhausted; login must restart.
    Expired,
}

#[derive(Clone)]
pub struct TwoFactorService {
    store: Arc<dyn IdentityStore>,
    communicator: Arc<dyn Communicator>,
}

impl TwoFactorService {
    pub fn new(store: Arc<dyn IdentityStore>, communicator: Arc<dyn Communicator>) -> Self {
        Self { store, communicator }
    }

    /// Open a challenge for an auth record whose two-factor gate is
    /// enabled. SMS/email methods deliver a one-time code; TOTP sends
    /// nothing and verifies against the record's shared secret.
    pub async fn begin(&self, auth: &AuthRecord) -> Result<TwoFactorChallenge, ServiceError> {
        let method = auth.two_factor.method.ok_or_else(|| {
            ServiceError::Validation("two-factor enabled without a method".to_string())
        })?;

        let code_hash = match method {
            TwoFactorMethod::Totp => None,
            TwoFactorMethod::Sms => {
                let phone = auth.two_factor.phone_number.as_deref().ok_or_else(|| {
                    ServiceError::Validation("SMS two-factor without a phone number".to_string())
                })?;
                let code = generate_otp();
                self.communicator
                    .send_sms(phone, &format!("Your verification code is {}", code))
                    .await
                    .map_err(|e| ServiceError::Collaborator(e.to_string()))?;
                Some(hash_otp(&code))
            }
            TwoFactorMethod::Email => {
                let email = auth.two_factor.email.as_deref().ok_or_else(|| {
                    ServiceError::Validation("email two-factor without an address".to_string())
                })?;
                let code = generate_otp();
                self.communicator
                    .send_email(
                        "Your verification code",
                        &format!("Your verification code is {}", code),
                        &[email.to_string()],
                    )
                    .await
                    .map_err(|e| ServiceError::Collaborator(e.to_string()))?;
                Some(hash_otp(&code))
            }
        };

        let challenge = TwoFactorChallenge::new(
            auth.id.clone(),
            auth.account_id.clone(),
            method,
            code_hash,
            OTP_EXPIRY_SECONDS,
        );
        self.store.insert_challenge(challenge.clone()).await?;
        tracing::debug!(auth_id = %auth.id, method = ?method, "two-factor challenge opened");
        Ok(challenge)
    }

    /// Verify a code against an open challenge. A rejected attempt keeps
    /// the challenge open until the attempt bound is reached.
    pub async fn verify(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<TwoFactorVerdict, ServiceError> {
        let challenge = match self.store.get_challenge(challenge_id).await? {
            Some(c) => c,
            None => return Ok(TwoFactorVerdict::Expired),
        };

        if challenge.is_expired() || challenge.attempts >= OTP_MAX_ATTEMPTS {
            self.store.remove_challenge(challenge_id).await?;
            return Ok(TwoFactorVerdict::Expired);
        }

        let accepted = match challenge.method {
            TwoFactorMethod::Totp => {
                let auth = self
                    .store
                    .get_auth(&challenge.auth_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("auth record vanished".to_string()))?;
                let secret = auth.two_factor.totp_secret.as_deref().ok_or_else(|| {
                    ServiceError::Validation("TOTP enabled without a secret".to_string())
                })?;
                verify_totp(secret, code)?
            }
            TwoFactorMethod::Sms | TwoFactorMethod::Email => challenge
                .code_hash
                .as_deref()
                .map(|stored| hashes_equal(&hash_otp(code), stored))
                .unwrap_or(false),
        };

        if accepted {
            self.store.remove_challenge(challenge_id).await?;
            Ok(TwoFactorVerdict::Accepted {
                account_id: challenge.account_id,
                auth_id: challenge.auth_id,
            })
        } else {
            // The counter bump is atomic in the store so racing wrong-code
            // attempts each land exactly once.
            let attempts = match self.store.record_challenge_attempt(challenge_id).await {
                Ok(n) => n,
                Err(StoreError::NotFound) => return Ok(TwoFactorVerdict::Expired),
                Err(e) => return Err(e.into()),
            };
            if attempts >= OTP_MAX_ATTEMPTS {
                self.store.remove_challenge(challenge_id).await?;
            }
            Ok(TwoFactorVerdict::Rejected)
        }
    }
}

pub fn generate_totp_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

fn build_totp(secret_base32: &str) -> Result<TOTP, ServiceError> {
    let secret = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| ServiceError::Validation(format!("malformed TOTP secret: {:?}", e)))?;
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP,
        secret,
        Some(TOTP_ISSUER.to_string()),
        "account".to_string(),
    )
    .map_err(|e| ServiceError::Validation(format!("TOTP init: {}", e)))
}

pub fn verify_totp(secret_base32: &str, code: &str) -> Result<bool, ServiceError> {
    let totp = build_totp(secret_base32)?;
    totp.check_current(code)
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("TOTP clock: {}", e)))
}

/// Current code for a secret; used by enrollment verification and tests.
pub fn current_totp(secret_base32: &str) -> Result<String, ServiceError> {
    let totp = build_totp(secret_base32)?;
    totp.generate_current()
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("TOTP clock: {}", e)))
}

fn generate_otp() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:0width$}", n, width = OTP_LENGTH)
}

fn hash_otp(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}
