//! Certificate credential lifecycle: CSR signing through the external
//! authority, registration as an auth record, and monotonic revocation.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::audit::AuditRecorder;
use super::collaborators::{CertificateAuthority, IssuedCertificate};
use super::context::RequestContext;
use super::ServiceError;
use crate::dtos::admin::{IssueCertificateRequest, RevokeCertificateRequest};
use crate::models::{
    AuditOperation, AuthMethod, AuthRecord, CertificateAuth, EntityKind,
};
use crate::store::IdentityStore;

/// Issued credential handed back to the caller: the registered auth record
/// plus the PEM the client installs.
#[derive(Debug)]
pub struct IssuedCredential {
    pub auth: AuthRecord,
    pub certificate_pem: String,
}

#[derive(Clone)]
pub struct CertificateService {
    store: Arc<dyn IdentityStore>,
    ca: Arc<dyn CertificateAuthority>,
    audit: AuditRecorder,
}

impl CertificateService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        ca: Arc<dyn CertificateAuthority>,
        audit: AuditRecorder,
    ) -> Self {
        Self { store, ca, audit }
    }

    /// Sign a CSR through the authority and register the result as a
    /// certificate credential on the account. A CA failure surfaces as a
    /// collaborator error and nothing is persisted.
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        req: IssueCertificateRequest,
    ) -> Result<IssuedCredential, ServiceError> {
        req.validate()?;
        let account = self
            .store
            .get_account(&req.account_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("account {} not found", req.account_id))
            })?;
        if !account.is_active {
            return Err(ServiceError::Validation(
                "cannot issue a certificate for an inactive account".to_string(),
            ));
        }

        let issued = self
            .ca
            .sign_csr(&req.csr_pem, &req.profile)
            .await
            .map_err(|e| ServiceError::Collaborator(e.to_string()))?;

        let auth = self
            .store
            .create_auth(AuthRecord::new(
                account.id.clone(),
                AuthMethod::Certificate(certificate_auth(&issued)),
            ))
            .await?;

        tracing::info!(
            auth_id = %auth.id,
            account_id = %account.id,
            serial = %issued.serial_number,
            "certificate issued"
        );
        self.audit.record(
            ctx,
            AuditOperation::Create,
            EntityKind::Auth,
            &auth.id,
            serde_json::to_value(&auth).unwrap_or(serde_json::Value::Null),
            None,
        );
        Ok(IssuedCredential {
            auth,
            certificate_pem: issued.certificate_pem,
        })
    }

    /// Revoke a certificate credential. Revocation is monotonic: a second
    /// revocation of the same record is a no-op that keeps the original
    /// reason and timestamp. The authority is informed before the local
    /// record flips, so a CA failure leaves the record untouched.
    pub async fn revoke(
        &self,
        ctx: &RequestContext,
        auth_id: &str,
        req: RevokeCertificateRequest,
    ) -> Result<AuthRecord, ServiceError> {
        req.validate()?;
        let mut auth = self
            .store
            .get_auth(auth_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("auth record {} not found", auth_id)))?;

        let cert = match &mut auth.method {
            AuthMethod::Certificate(c) => c,
            _ => {
                return Err(ServiceError::Validation(
                    "revocation applies only to certificate credentials".to_string(),
                ))
            }
        };
        if cert.is_revoked {
            return Ok(auth);
        }

        self.ca
            .revoke(&cert.serial_number, &req.reason)
            .await
            .map_err(|e| ServiceError::Collaborator(e.to_string()))?;

        let now = Utc::now();
        cert.is_revoked = true;
        cert.revocation_reason = Some(req.reason.clone());
        cert.revoked_at = Some(now);
        auth.last_update = now;

        let updated = self.store.update_auth(&req.etag, auth).await?;

        tracing::info!(auth_id = %updated.id, reason = %req.reason, "certificate revoked");
        self.audit.record(
            ctx,
            AuditOperation::Update,
            EntityKind::Auth,
            &updated.id,
            serde_json::to_value(&updated).unwrap_or(serde_json::Value::Null),
            Some(json!({
                "is_revoked": { "from": false, "to": true },
                "revocation_reason": req.reason,
            })),
        );
        Ok(updated)
    }
}

fn certificate_auth(issued: &IssuedCertificate) -> CertificateAuth {
    CertificateAuth {
        thumbprint: issued.thumbprint.to_lowercase(),
        serial_number: issued.serial_number.clone(),
        issuer: issued.issuer.clone(),
        subject: issued.subject.clone(),
        public_key_hash: issued.public_key_hash.clone(),
        valid_from: issued.valid_from,
        valid_until: issued.valid_until,
        is_revoked: false,
        revocation_reason: None,
        revoked_at: None,
    }
}
