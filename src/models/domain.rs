use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainController {
    pub host: String,
    pub port: u16,
}

/// Registered Active Directory domain reachable for directory-bound logins.
/// The service account credentials are used for the initial bind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapDomain {
    pub id: String,
    pub etag: String,
    pub last_update: DateTime<Utc>,
    pub name: String,
    pub netbios_name: String,
    pub domain_controllers: Vec<DomainController>,
    pub base_dn: String,
    pub use_secure_ldap: bool,
    pub service_account_username: String,
    pub service_account_password: String,
}

impl LdapDomain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        netbios_name: String,
        domain_controllers: Vec<DomainController>,
        base_dn: String,
        use_secure_ldap: bool,
        service_account_username: String,
        service_account_password: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            etag: super::new_etag(),
            last_update: Utc::now(),
            name,
            netbios_name,
            domain_controllers,
            base_dn,
            use_secure_ldap,
            service_account_username,
            service_account_password,
        }
    }

    /// A login request may name the domain by DNS name or NETBIOS name.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.name.eq_ignore_ascii_case(identifier)
            || self.netbios_name.eq_ignore_ascii_case(identifier)
    }
}
