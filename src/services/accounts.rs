//! Administrative and self-service flows over accounts, auth records and
//! directory domains. Every mutation lands on the audit chain; reads do
//! not.

use chrono::Utc;
use rand::RngCore;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::audit::AuditRecorder;
use super::collaborators::Communicator;
use super::context::RequestContext;
use super::password::{
    apply_password_change, create_salt, hash_password, password_expiry_from_today,
    verify_password, Password,
};
use super::tokens::TokenIssuer;
use super::two_factor::generate_totp_secret;
use super::ServiceError;
use crate::dtos::admin::{
    CreateAccountRequest, CreateDirectoryAuthRequest, CreateDomainRequest,
    CreateEmailAuthRequest, CreateKauAuthRequest, UpdateAccountRequest, UpdateAuthRequest,
    UpdateDomainRequest,
};
use crate::dtos::auth::{ChangePasswordRequest, ResetPasswordRequest};
use crate::models::{
    Account, AuditOperation, AuthMethod, AuthRecord, DirectoryAuth, EmailAuth, EntityKind,
    KauAuth, LdapDomain, TwoFactorMethod, VerificationToken,
};
use crate::store::IdentityStore;

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn IdentityStore>,
    audit: AuditRecorder,
    communicator: Arc<dyn Communicator>,
    tokens: TokenIssuer,
    /// Public base URL embedded in confirmation/reset links.
    base_url: String,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        audit: AuditRecorder,
        communicator: Arc<dyn Communicator>,
        tokens: TokenIssuer,
        base_url: String,
    ) -> Self {
        Self {
            store,
            audit,
            communicator,
            tokens,
            base_url,
        }
    }

    // -----------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------

    pub async fn create_account(
        &self,
        ctx: &RequestContext,
        req: CreateAccountRequest,
    ) -> Result<Account, ServiceError> {
        req.validate()?;
        let account = self
            .store
            .create_account(Account::new(req.name, req.account_type))
            .await?;

        tracing::info!(account_id = %account.id, name = %account.name, "account created");
        self.audit.record(
            ctx,
            AuditOperation::Create,
            EntityKind::Account,
            &account.id,
            snapshot(&account),
            None,
        );
        Ok(account)
    }

    pub async fn get_account(&self, id: &str) -> Result<Account, ServiceError> {
        self.store
            .get_account(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("account {} not found", id)))
    }

    /// Versioned update of the account's mutable fields. The caller's etag
    /// must match the stored record or the write fails without merging.
    pub async fn update_account(
        &self,
        ctx: &RequestContext,
        id: &str,
        req: UpdateAccountRequest,
    ) -> Result<Account, ServiceError> {
        req.validate()?;
        let mut account = self.get_account(id).await?;

        let delta = json!({
            "name": { "from": account.name, "to": req.name },
            "is_active": { "from": account.is_active, "to": req.is_active },
        });

        account.name = req.name;
        account.is_active = req.is_active;
        account.contacts = req.contacts;
        account.last_update = Utc::now();

        let updated = self.store.update_account(&req.etag, account).await?;

        self.audit.record(
            ctx,
            AuditOperation::Update,
            EntityKind::Account,
            &updated.id,
            snapshot(&updated),
            Some(delta),
        );
        Ok(updated)
    }

    // -----------------------------------------------------------------
    // Auth records
    // -----------------------------------------------------------------

    /// Attach an email/password credential to an account. The address must
    /// be confirmed through the mailed link before it can log in.
    pub async fn create_email_auth(
        &self,
        ctx: &RequestContext,
        account_id: &str,
        req: CreateEmailAuthRequest,
    ) -> Result<AuthRecord, ServiceError> {
        req.validate()?;
        let account = self.get_account(account_id).await?;

        let salt = create_salt();
        let hash = hash_password(&Password::new(req.password), &salt)?;
        let method = AuthMethod::Email(EmailAuth {
            email: req.email.to_lowercase(),
            is_email_confirmed: false,
            password_expires_at: password_expiry_from_today(),
            password_hash: hash,
            password_salt: salt,
            password_history: Vec::new(),
        });

        let auth = self
            .store
            .create_auth(AuthRecord::new(account.id.clone(), method))
            .await?;

        self.send_confirmation_email(&auth).await?;
        self.record_auth_created(ctx, &auth);
        Ok(auth)
    }

    pub async fn create_directory_auth(
        &self,
        ctx: &RequestContext,
        account_id: &str,
        req: CreateDirectoryAuthRequest,
    ) -> Result<AuthRecord, ServiceError> {
        req.validate()?;
        let account = self.get_account(account_id).await?;
        if self.store.get_domain(&req.ldap_domain_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "directory domain {} not found",
                req.ldap_domain_id
            )));
        }

        let method = AuthMethod::ActiveDirectory(DirectoryAuth {
            ldap_domain_id: req.ldap_domain_id,
            directory_username: req.directory_username.to_lowercase(),
        });
        let auth = self
            .store
            .create_auth(AuthRecord::new(account.id.clone(), method))
            .await?;

        self.record_auth_created(ctx, &auth);
        Ok(auth)
    }

    pub async fn create_kau_auth(
        &self,
        ctx: &RequestContext,
        account_id: &str,
        req: CreateKauAuthRequest,
    ) -> Result<AuthRecord, ServiceError> {
        req.validate()?;
        let account = self.get_account(account_id).await?;

        let method = AuthMethod::Kau(KauAuth {
            external_user_id: req.external_user_id,
            legal_name: req.legal_name,
            email: req.email.to_lowercase(),
        });
        let auth = self
            .store
            .create_auth(AuthRecord::new(account.id.clone(), method))
            .await?;

        self.record_auth_created(ctx, &auth);
        Ok(auth)
    }

    pub async fn get_auth(&self, id: &str) -> Result<AuthRecord, ServiceError> {
        self.store
            .get_auth(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("auth record {} not found", id)))
    }

    pub async fn list_auths(&self, account_id: &str) -> Result<Vec<AuthRecord>, ServiceError> {
        // Listing against a missing account is a 404, not an empty list.
        self.get_account(account_id).await?;
        Ok(self.store.list_auths_for_account(account_id).await?)
    }

    /// Update an auth record's activation flag and two-factor settings.
    /// Enabling TOTP without a stored secret mints one; the caller reads it
    /// back from the returned record for enrollment.
    pub async fn update_auth(
        &self,
        ctx: &RequestContext,
        auth_id: &str,
        req: UpdateAuthRequest,
    ) -> Result<AuthRecord, ServiceError> {
        req.validate()?;
        let mut auth = self.get_auth(auth_id).await?;

        let mut two_factor = req.two_factor;
        if two_factor.enabled {
            match two_factor.method {
                None => {
                    return Err(ServiceError::Validation(
                        "two-factor enabled without a method".to_string(),
                    ))
                }
                Some(TwoFactorMethod::Totp) => {
                    if two_factor.totp_secret.is_none() {
                        two_factor.totp_secret = auth
                            .two_factor
                            .totp_secret
                            .clone()
                            .or_else(|| Some(generate_totp_secret()));
                    }
                }
                Some(TwoFactorMethod::Sms) if two_factor.phone_number.is_none() => {
                    return Err(ServiceError::Validation(
                        "SMS two-factor without a phone number".to_string(),
                    ))
                }
                Some(TwoFactorMethod::Email) if two_factor.email.is_none() => {
                    return Err(ServiceError::Validation(
                        "email two-factor without an address".to_string(),
                    ))
                }
                Some(_) => {}
            }
        }

        let delta = json!({
            "is_active": { "from": auth.is_active, "to": req.is_active },
            "two_factor_enabled": { "from": auth.two_factor.enabled, "to": two_factor.enabled },
            "two_factor_method": { "from": auth.two_factor.method, "to": two_factor.method },
        });

        auth.is_active = req.is_active;
        auth.two_factor = two_factor;
        auth.last_update = Utc::now();

        let updated = self.store.update_auth(&req.etag, auth).await?;

        self.audit.record(
            ctx,
            AuditOperation::Update,
            EntityKind::Auth,
            &updated.id,
            snapshot(&updated),
            Some(delta),
        );
        Ok(updated)
    }

    // -----------------------------------------------------------------
    // Email confirmation and password self-service
    // -----------------------------------------------------------------

    /// Redeem a mailed confirmation link. The token is single-use; a second
    /// redemption of the same value fails.
    pub async fn confirm_email(&self, token: &str) -> Result<AuthRecord, ServiceError> {
        let verification = self
            .store
            .take_verification_token(token)
            .await?
            .filter(|t| t.purpose == crate::models::TokenPurpose::EmailConfirmation)
            .ok_or(ServiceError::InvalidOrExpiredToken)?;
        if verification.is_expired() {
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        let mut auth = self.get_auth(&verification.auth_id).await?;
        let email_auth = match &mut auth.method {
            AuthMethod::Email(e) => e,
            _ => {
                return Err(ServiceError::Validation(
                    "confirmation token bound to a non-email credential".to_string(),
                ))
            }
        };
        if email_auth.is_email_confirmed {
            return Ok(auth);
        }
        email_auth.is_email_confirmed = true;
        auth.last_update = Utc::now();

        let etag = auth.etag.clone();
        let updated = self.store.update_auth(&etag, auth).await?;

        tracing::info!(auth_id = %updated.id, "email address confirmed");
        self.audit.record(
            &RequestContext::system(),
            AuditOperation::Update,
            EntityKind::Auth,
            &updated.id,
            snapshot(&updated),
            Some(json!({ "is_email_confirmed": { "from": false, "to": true } })),
        );
        Ok(updated)
    }

    /// Mail a reset link when the address maps to an active credential.
    /// Always succeeds from the caller's perspective so the endpoint does
    /// not reveal which addresses are registered.
    pub async fn forgot_password(&self, email: &str) -> Result<(), ServiceError> {
        let key = format!("email:{}", email.to_lowercase());
        let auth = match self.store.find_auth_by_natural_key(&key).await? {
            Some(auth) => auth,
            None => {
                tracing::debug!("password reset requested for unregistered address");
                return Ok(());
            }
        };

        let token = generate_link_token();
        self.store
            .insert_verification_token(VerificationToken::new_password_reset(
                auth.id.clone(),
                token.clone(),
            ))
            .await?;

        let link = format!("{}/auth/reset-password?token={}", self.base_url, token);
        self.communicator
            .send_email(
                "Reset your password",
                &format!("Use this link to choose a new password: {}", link),
                &[email.to_lowercase()],
            )
            .await
            .map_err(|e| ServiceError::Collaborator(e.to_string()))?;
        Ok(())
    }

    /// Redeem a reset link and set a new password. Every outstanding
    /// refresh token for the account is revoked.
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), ServiceError> {
        req.validate()?;
        let verification = self
            .store
            .take_verification_token(&req.token)
            .await?
            .filter(|t| t.purpose == crate::models::TokenPurpose::PasswordReset)
            .ok_or(ServiceError::InvalidOrExpiredToken)?;
        if verification.is_expired() {
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        let auth = self.get_auth(&verification.auth_id).await?;
        self.set_password(auth, &Password::new(req.new_password))
            .await
    }

    /// Authenticated password change: the current password must verify.
    pub async fn change_password(&self, req: ChangePasswordRequest) -> Result<(), ServiceError> {
        req.validate()?;
        let key = format!("email:{}", req.email.to_lowercase());
        let auth = self
            .store
            .find_auth_by_natural_key(&key)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        let email_auth = match &auth.method {
            AuthMethod::Email(e) => e,
            _ => return Err(ServiceError::InvalidCredentials),
        };
        if !verify_password(
            &Password::new(req.current_password),
            &email_auth.password_salt,
            &email_auth.password_hash,
        )? {
            return Err(ServiceError::InvalidCredentials);
        }

        self.set_password(auth, &Password::new(req.new_password))
            .await
    }

    async fn set_password(
        &self,
        mut auth: AuthRecord,
        new_password: &Password,
    ) -> Result<(), ServiceError> {
        let email_auth = match &mut auth.method {
            AuthMethod::Email(e) => e,
            _ => {
                return Err(ServiceError::Validation(
                    "password change on a non-email credential".to_string(),
                ))
            }
        };
        apply_password_change(email_auth, new_password)?;
        auth.last_update = Utc::now();

        let etag = auth.etag.clone();
        let updated = self.store.update_auth(&etag, auth).await?;
        self.tokens.revoke_all(&updated.account_id).await?;

        tracing::info!(auth_id = %updated.id, "password changed; refresh tokens revoked");
        self.audit.record(
            &RequestContext::system(),
            AuditOperation::Update,
            EntityKind::Auth,
            &updated.id,
            snapshot(&updated),
            Some(json!({ "password_changed": true })),
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Directory domains
    // -----------------------------------------------------------------

    pub async fn create_domain(
        &self,
        ctx: &RequestContext,
        req: CreateDomainRequest,
    ) -> Result<LdapDomain, ServiceError> {
        req.validate()?;
        let domain = self
            .store
            .create_domain(LdapDomain::new(
                req.name,
                req.netbios_name,
                req.domain_controllers,
                req.base_dn,
                req.use_secure_ldap,
                req.service_account_username,
                req.service_account_password,
            ))
            .await?;

        tracing::info!(domain_id = %domain.id, name = %domain.name, "directory domain registered");
        self.audit.record(
            ctx,
            AuditOperation::Create,
            EntityKind::LdapDomain,
            &domain.id,
            domain_snapshot(&domain),
            None,
        );
        Ok(domain)
    }

    pub async fn update_domain(
        &self,
        ctx: &RequestContext,
        id: &str,
        req: UpdateDomainRequest,
    ) -> Result<LdapDomain, ServiceError> {
        req.validate()?;
        let mut domain = self.get_domain(id).await?;

        let delta = json!({
            "name": { "from": domain.name, "to": req.name },
            "netbios_name": { "from": domain.netbios_name, "to": req.netbios_name },
        });

        domain.name = req.name;
        domain.netbios_name = req.netbios_name;
        domain.domain_controllers = req.domain_controllers;
        domain.base_dn = req.base_dn;
        domain.use_secure_ldap = req.use_secure_ldap;
        domain.service_account_username = req.service_account_username;
        domain.service_account_password = req.service_account_password;
        domain.last_update = Utc::now();

        let updated = self.store.update_domain(&req.etag, domain).await?;

        self.audit.record(
            ctx,
            AuditOperation::Update,
            EntityKind::LdapDomain,
            &updated.id,
            domain_snapshot(&updated),
            Some(delta),
        );
        Ok(updated)
    }

    pub async fn get_domain(&self, id: &str) -> Result<LdapDomain, ServiceError> {
        self.store
            .get_domain(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("directory domain {} not found", id)))
    }

    pub async fn list_domains(&self) -> Result<Vec<LdapDomain>, ServiceError> {
        Ok(self.store.list_domains().await?)
    }

    // -----------------------------------------------------------------

    async fn send_confirmation_email(&self, auth: &AuthRecord) -> Result<(), ServiceError> {
        let email = match &auth.method {
            AuthMethod::Email(e) => e.email.clone(),
            _ => return Ok(()),
        };

        let token = generate_link_token();
        self.store
            .insert_verification_token(VerificationToken::new_email_confirmation(
                auth.id.clone(),
                token.clone(),
            ))
            .await?;

        let link = format!("{}/auth/confirm-email?token={}", self.base_url, token);
        self.communicator
            .send_email(
                "Confirm your email address",
                &format!("Use this link to confirm your address: {}", link),
                &[email],
            )
            .await
            .map_err(|e| ServiceError::Collaborator(e.to_string()))
    }

    fn record_auth_created(&self, ctx: &RequestContext, auth: &AuthRecord) {
        tracing::info!(
            auth_id = %auth.id,
            account_id = %auth.account_id,
            method = auth.method.name(),
            "auth record created"
        );
        self.audit.record(
            ctx,
            AuditOperation::Create,
            EntityKind::Auth,
            &auth.id,
            snapshot(auth),
            None,
        );
    }
}

fn snapshot<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Domain snapshots never carry the service account password.
fn domain_snapshot(domain: &LdapDomain) -> serde_json::Value {
    let mut value = snapshot(domain);
    if let Some(map) = value.as_object_mut() {
        map.remove("service_account_password");
    }
    value
}

fn generate_link_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountType;
    use crate::services::collaborators::MockCommunicator;
    use crate::store::MemoryStore;

    fn service() -> (AccountService, Arc<MockCommunicator>, Arc<dyn IdentityStore>) {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let communicator = Arc::new(MockCommunicator::new());
        let (audit, _handle) = AuditRecorder::spawn(store.clone());
        let tokens = TokenIssuer::new(store.clone(), b"test-secret", 15, 7);
        let service = AccountService::new(
            store.clone(),
            audit,
            communicator.clone(),
            tokens,
            "http://localhost:3000".to_string(),
        );
        (service, communicator, store)
    }

    fn ctx() -> RequestContext {
        RequestContext::system()
    }

    #[tokio::test]
    async fn email_auth_creation_mails_a_confirmation_link() {
        let (service, communicator, _store) = service();
        let account = service
            .create_account(
                &ctx(),
                CreateAccountRequest {
                    name: "alice".to_string(),
                    account_type: AccountType::User,
                },
            )
            .await
            .unwrap();

        let auth = service
            .create_email_auth(
                &ctx(),
                &account.id,
                CreateEmailAuthRequest {
                    email: "Alice@Example.com".to_string(),
                    password: "initial-pass".to_string(),
                },
            )
            .await
            .unwrap();

        match &auth.method {
            AuthMethod::Email(e) => {
                assert_eq!(e.email, "alice@example.com");
                assert!(!e.is_email_confirmed);
            }
            other => panic!("unexpected method: {:?}", other),
        }

        let mail = communicator.last_email().expect("no confirmation mail");
        assert_eq!(mail.recipients, vec!["alice@example.com".to_string()]);
        assert!(mail.body.contains("/auth/confirm-email?token="));
    }

    #[tokio::test]
    async fn confirmation_token_is_single_use() {
        let (service, communicator, _store) = service();
        let account = service
            .create_account(
                &ctx(),
                CreateAccountRequest {
                    name: "bob".to_string(),
                    account_type: AccountType::User,
                },
            )
            .await
            .unwrap();
        service
            .create_email_auth(
                &ctx(),
                &account.id,
                CreateEmailAuthRequest {
                    email: "bob@example.com".to_string(),
                    password: "initial-pass".to_string(),
                },
            )
            .await
            .unwrap();

        let mail = communicator.last_email().unwrap();
        let token = mail.body.split("token=").nth(1).unwrap().to_string();

        let confirmed = service.confirm_email(&token).await.unwrap();
        match &confirmed.method {
            AuthMethod::Email(e) => assert!(e.is_email_confirmed),
            other => panic!("unexpected method: {:?}", other),
        }

        let err = service.confirm_email(&token).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn stale_etag_update_is_rejected_without_merging() {
        let (service, _communicator, _store) = service();
        let account = service
            .create_account(
                &ctx(),
                CreateAccountRequest {
                    name: "carol".to_string(),
                    account_type: AccountType::User,
                },
            )
            .await
            .unwrap();

        let first = service
            .update_account(
                &ctx(),
                &account.id,
                UpdateAccountRequest {
                    etag: account.etag.clone(),
                    name: "carol-renamed".to_string(),
                    is_active: true,
                    contacts: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_ne!(first.etag, account.etag);

        // Second writer still holds the original etag.
        let err = service
            .update_account(
                &ctx(),
                &account.id,
                UpdateAccountRequest {
                    etag: account.etag,
                    name: "carol-other".to_string(),
                    is_active: false,
                    contacts: Vec::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConcurrencyConflict));

        let current = service.get_account(&account.id).await.unwrap();
        assert_eq!(current.name, "carol-renamed");
        assert!(current.is_active);
    }

    #[tokio::test]
    async fn enabling_totp_mints_a_secret_once() {
        let (service, _communicator, _store) = service();
        let account = service
            .create_account(
                &ctx(),
                CreateAccountRequest {
                    name: "dave".to_string(),
                    account_type: AccountType::User,
                },
            )
            .await
            .unwrap();
        let auth = service
            .create_email_auth(
                &ctx(),
                &account.id,
                CreateEmailAuthRequest {
                    email: "dave@example.com".to_string(),
                    password: "initial-pass".to_string(),
                },
            )
            .await
            .unwrap();

        let enabled = service
            .update_auth(
                &ctx(),
                &auth.id,
                UpdateAuthRequest {
                    etag: auth.etag,
                    is_active: true,
                    two_factor: crate::models::TwoFactorConfig {
                        enabled: true,
                        method: Some(TwoFactorMethod::Totp),
                        phone_number: None,
                        email: None,
                        totp_secret: None,
                    },
                },
            )
            .await
            .unwrap();
        let secret = enabled.two_factor.totp_secret.clone().expect("no secret");

        let again = service
            .update_auth(
                &ctx(),
                &enabled.id,
                UpdateAuthRequest {
                    etag: enabled.etag,
                    is_active: true,
                    two_factor: crate::models::TwoFactorConfig {
                        enabled: true,
                        method: Some(TwoFactorMethod::Totp),
                        phone_number: None,
                        email: None,
                        totp_secret: None,
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(again.two_factor.totp_secret.as_deref(), Some(secret.as_str()));
    }

    #[tokio::test]
    async fn forgot_password_is_silent_for_unknown_addresses() {
        let (service, communicator, _store) = service();
        service.forgot_password("nobody@example.com").await.unwrap();
        assert!(communicator.last_email().is_none());
    }

    #[tokio::test]
    async fn change_password_requires_the_current_password() {
        let (service, _communicator, _store) = service();
        let account = service
            .create_account(
                &ctx(),
                CreateAccountRequest {
                    name: "erin".to_string(),
                    account_type: AccountType::User,
                },
            )
            .await
            .unwrap();
        service
            .create_email_auth(
                &ctx(),
                &account.id,
                CreateEmailAuthRequest {
                    email: "erin@example.com".to_string(),
                    password: "initial-pass".to_string(),
                },
            )
            .await
            .unwrap();

        let err = service
            .change_password(ChangePasswordRequest {
                email: "erin@example.com".to_string(),
                current_password: "wrong".to_string(),
                new_password: "next-pass-1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));

        service
            .change_password(ChangePasswordRequest {
                email: "erin@example.com".to_string(),
                current_password: "initial-pass".to_string(),
                new_password: "next-pass-1".to_string(),
            })
            .await
            .unwrap();
    }
}
