use serde::Deserialize;
use validator::Validate;

use crate::models::{AccountType, Contact, DomainController, TwoFactorConfig};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1))]
    pub name: String,
    pub account_type: AccountType,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAccountRequest {
    #[validate(length(min = 1))]
    pub etag: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub is_active: bool,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEmailAuthRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDirectoryAuthRequest {
    #[validate(length(min = 1))]
    pub ldap_domain_id: String,
    #[validate(length(min = 1))]
    pub directory_username: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateKauAuthRequest {
    #[validate(length(min = 1))]
    pub external_user_id: String,
    #[validate(length(min = 1))]
    pub legal_name: String,
    #[validate(email)]
    pub email: String,
}

/// Versioned write to an auth record's mutable flags; two-factor changes
/// ride the same etag discipline as everything else.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAuthRequest {
    #[validate(length(min = 1))]
    pub etag: String,
    pub is_active: bool,
    pub two_factor: TwoFactorConfig,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDomainRequest {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub netbios_name: String,
    #[validate(length(min = 1))]
    pub domain_controllers: Vec<DomainController>,
    pub base_dn: String,
    pub use_secure_ldap: bool,
    pub service_account_username: String,
    pub service_account_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDomainRequest {
    #[validate(length(min = 1))]
    pub etag: String,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub netbios_name: String,
    pub domain_controllers: Vec<DomainController>,
    pub base_dn: String,
    pub use_secure_ldap: bool,
    pub service_account_username: String,
    pub service_account_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueCertificateRequest {
    #[validate(length(min = 1))]
    pub account_id: String,
    #[validate(length(min = 1))]
    pub csr_pem: String,
    #[validate(length(min = 1))]
    pub profile: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RevokeCertificateRequest {
    #[validate(length(min = 1))]
    pub etag: String,
    #[validate(length(min = 1))]
    pub reason: String,
}
