//! Password key derivation and history handling.
//!
//! PBKDF2-HMAC-SHA256 with a fixed iteration count and 32-byte output over
//! a per-record salt that lives as long as the record, so history entries
//! stay comparable against recomputed hashes. Comparisons are constant
//! time.

use chrono::{Duration, NaiveDate, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::ServiceError;
use crate::models::EmailAuth;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const HASH_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const HISTORY_DEPTH: usize = 10;
pub const PASSWORD_VALIDITY_DAYS: i64 = 90;

/// Newtype to keep raw passwords out of logs and error messages.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Per-record random salt, hex-encoded.
pub fn create_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Derive the hex-encoded hash of `password` under `salt`.
pub fn hash_password(password: &Password, salt: &str) -> Result<String, ServiceError> {
    let salt_bytes = hex::decode(salt)
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("malformed salt: {}", e)))?;
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(
        password.as_str().as_bytes(),
        &salt_bytes,
        PBKDF2_ITERATIONS,
        &mut out,
    );
    Ok(hex::encode(out))
}

/// Constant-time comparison of a candidate password against a stored hash.
pub fn verify_password(
    password: &Password,
    salt: &str,
    expected_hash: &str,
) -> Result<bool, ServiceError> {
    let computed = hash_password(password, salt)?;
    Ok(hashes_equal(&computed, expected_hash))
}

pub fn hashes_equal(a: &str, b: &str) -> bool {
    let (a, b) = match (hex::decode(a), hex::decode(b)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return false,
    };
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(&b).into()
}

/// Apply a password change or reset to an email credential.
///
/// Rejects `PasswordReuse` when the new hash matches the current hash or
/// any retained history entry; otherwise pushes the old hash onto the
/// bounded history (oldest dropped) and advances `password_expires_at`.
pub fn apply_password_change(
    auth: &mut EmailAuth,
    new_password: &Password,
) -> Result<(), ServiceError> {
    let new_hash = hash_password(new_password, &auth.password_salt)?;

    if hashes_equal(&new_hash, &auth.password_hash)
        || auth
            .password_history
            .iter()
            .any(|prior| hashes_equal(&new_hash, prior))
    {
        return Err(ServiceError::PasswordReuse);
    }

    auth.password_history.push(auth.password_hash.clone());
    if auth.password_history.len() > HISTORY_DEPTH {
        auth.password_history.remove(0);
    }
    auth.password_hash = new_hash;
    auth.password_expires_at = password_expiry_from_today();
    Ok(())
}

pub fn password_expiry_from_today() -> NaiveDate {
    (Utc::now() + Duration::days(PASSWORD_VALIDITY_DAYS)).date_naive()
}
