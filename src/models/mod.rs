//! Domain model for the identity service.
//!
//! Every mutable entity carries an opaque `etag` that is replaced on each
//! successful write; stores reject writes presenting a stale etag. Entities
//! are deactivated via flags, never hard-deleted, so the audit chain stays
//! continuous.

mod account;
mod audit;
mod auth;
mod challenge;
mod domain;
mod token;

pub use account::{Account, AccountType, Contact};
pub use audit::{AuditOperation, AuditTrailEntry, EntityKind};
pub use auth::{
    AuthMethod, AuthRecord, CertificateAuth, DirectoryAuth, EmailAuth, KauAuth, TwoFactorConfig,
    TwoFactorMethod,
};
pub use challenge::{TokenPurpose, TwoFactorChallenge, VerificationToken};
pub use domain::{DomainController, LdapDomain};
pub use token::{RefreshTokenRecord, TokenPair};

/// Generate a fresh opaque version token.
pub fn new_etag() -> String {
    uuid::Uuid::new_v4().to_string()
}
