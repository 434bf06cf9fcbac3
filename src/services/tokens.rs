//! Access/refresh token issuance and single-use rotation.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::ServiceError;
use crate::models::{RefreshTokenRecord, TokenPair};
use crate::store::{IdentityStore, StoreError};

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    store: Arc<dyn IdentityStore>,
    encoding_key: EncodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

impl TokenIssuer {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        secret: &[u8],
        access_token_expiry_minutes: i64,
        refresh_token_expiry_days: i64,
    ) -> Self {
        Self {
            store,
            encoding_key: EncodingKey::from_secret(secret),
            access_token_expiry_minutes,
            refresh_token_expiry_days,
        }
    }

    /// Mint a fresh pair: a signed access token and an opaque refresh value
    /// persisted as a hash with absolute expiry.
    pub async fn issue(&self, account_id: &str) -> Result<TokenPair, ServiceError> {
        let now = Utc::now();
        let access_expires = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: account_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: access_expires.timestamp(),
        };
        let access_token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("token signing: {}", e)))?;

        let refresh_token = generate_opaque_token();
        let record = RefreshTokenRecord::new(
            account_id.to_string(),
            &refresh_token,
            self.refresh_token_expiry_days,
        );
        let refresh_expires = record.expires_at;
        self.store.insert_refresh_token(record).await?;

        Ok(TokenPair {
            access_token,
            access_token_expires_at: access_expires,
            refresh_token,
            refresh_token_expires_at: refresh_expires,
        })
    }

    /// Rotate a refresh token: atomically mark it used and issue a new
    /// pair. Concurrent rotations of the same token yield exactly one
    /// winner; every other caller fails `InvalidOrExpiredToken`. A consumed
    /// token is never retried.
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let hash = RefreshTokenRecord::hash_token(refresh_token);
        let record = self
            .store
            .consume_refresh_token(&hash, Utc::now())
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ServiceError::InvalidOrExpiredToken,
                other => ServiceError::from(other),
            })?;

        tracing::debug!(account_id = %record.account_id, "refresh token rotated");
        self.issue(&record.account_id).await
    }

    /// Invalidate every outstanding refresh token for an account (password
    /// reset, deactivation).
    pub async fn revoke_all(&self, account_id: &str) -> Result<(), ServiceError> {
        self.store
            .revoke_refresh_tokens_for_account(account_id)
            .await?;
        Ok(())
    }
}

fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
