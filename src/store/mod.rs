//! Persistence contract consumed by the service layer.
//!
//! The multi-backend storage engine itself lives outside this service; the
//! trait below captures what the core requires of it: versioned
//! create/read/update keyed by id and the per-method natural keys, with
//! optimistic-concurrency semantics on every update. `memory::MemoryStore`
//! implements the contract in-process for the dev binary and the tests.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Account, AuditTrailEntry, AuthRecord, EntityKind, LdapDomain, RefreshTokenRecord,
    TwoFactorChallenge, VerificationToken,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied etag does not match the stored record. Writers must
    /// re-read and retry; nothing is merged.
    #[error("concurrency conflict: stale etag")]
    ConcurrencyConflict,

    #[error("record not found")]
    NotFound,

    #[error("duplicate natural key: {0}")]
    DuplicateKey(String),

    #[error("invalid write: {0}")]
    Invalid(String),

    #[error("store failure: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Unified store facade, injected as `Arc<dyn IdentityStore>`.
///
/// Every `update_*` compares the supplied etag against the stored one and
/// fails `ConcurrencyConflict` on mismatch; on success the returned record
/// carries a fresh etag.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    // Accounts
    async fn create_account(&self, account: Account) -> Result<Account, StoreError>;
    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError>;
    async fn update_account(
        &self,
        expected_etag: &str,
        account: Account,
    ) -> Result<Account, StoreError>;

    // Auth records
    async fn create_auth(&self, auth: AuthRecord) -> Result<AuthRecord, StoreError>;
    async fn get_auth(&self, id: &str) -> Result<Option<AuthRecord>, StoreError>;
    async fn update_auth(
        &self,
        expected_etag: &str,
        auth: AuthRecord,
    ) -> Result<AuthRecord, StoreError>;
    /// Lookup by the method-scoped natural key (`AuthMethod::natural_key`),
    /// active records only.
    async fn find_auth_by_natural_key(&self, key: &str)
        -> Result<Option<AuthRecord>, StoreError>;
    async fn list_auths_for_account(&self, account_id: &str)
        -> Result<Vec<AuthRecord>, StoreError>;

    // Directory domains
    async fn create_domain(&self, domain: LdapDomain) -> Result<LdapDomain, StoreError>;
    async fn get_domain(&self, id: &str) -> Result<Option<LdapDomain>, StoreError>;
    async fn update_domain(
        &self,
        expected_etag: &str,
        domain: LdapDomain,
    ) -> Result<LdapDomain, StoreError>;
    /// Resolve by DNS or NETBIOS name, case-insensitive.
    async fn find_domain_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<LdapDomain>, StoreError>;
    async fn list_domains(&self) -> Result<Vec<LdapDomain>, StoreError>;

    // Refresh tokens
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError>;
    /// Atomically mark the token used and return it. Exactly one caller
    /// wins a concurrent race; everyone else gets `NotFound`. Expired or
    /// already-used tokens are `NotFound` as well.
    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError>;
    async fn revoke_refresh_tokens_for_account(&self, account_id: &str)
        -> Result<(), StoreError>;

    // Verification tokens (one-shot links)
    async fn insert_verification_token(&self, token: VerificationToken)
        -> Result<(), StoreError>;
    /// Remove and return the token; a second take of the same value fails.
    async fn take_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<VerificationToken>, StoreError>;

    // Two-factor challenges
    async fn insert_challenge(&self, challenge: TwoFactorChallenge) -> Result<(), StoreError>;
    async fn get_challenge(&self, id: &str) -> Result<Option<TwoFactorChallenge>, StoreError>;
    /// Atomically bump the attempt counter and return the new count.
    /// Concurrent wrong-code attempts must each land exactly once.
    async fn record_challenge_attempt(&self, id: &str) -> Result<u32, StoreError>;
    async fn remove_challenge(&self, id: &str) -> Result<(), StoreError>;

    // Audit chain
    async fn append_audit_entry(&self, entry: AuditTrailEntry) -> Result<(), StoreError>;
    async fn get_audit_entry(&self, id: &str) -> Result<Option<AuditTrailEntry>, StoreError>;
    async fn audit_head(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<String>, StoreError>;
    async fn set_audit_head(
        &self,
        kind: EntityKind,
        entity_id: &str,
        trail_id: &str,
    ) -> Result<(), StoreError>;
}
