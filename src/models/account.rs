use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    User,
    ExternalSystem,
    InternalService,
}

/// Contact person attached to an account (operational, not a credential).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

/// An account owns zero-or-more auth records. Non-interactive accounts
/// (external systems, internal services) additionally carry a generated
/// account secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub etag: String,
    pub last_update: DateTime<Utc>,
    pub account_type: AccountType,
    pub name: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_secret: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

impl Account {
    pub fn new(name: String, account_type: AccountType) -> Self {
        let account_secret = match account_type {
            AccountType::User => None,
            AccountType::ExternalSystem | AccountType::InternalService => {
                Some(generate_secret())
            }
        };

        Self {
            id: Uuid::new_v4().to_string(),
            etag: super::new_etag(),
            last_update: Utc::now(),
            account_type,
            name,
            is_active: true,
            account_secret,
            contacts: Vec::new(),
        }
    }
}

fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_accounts_have_no_secret() {
        let account = Account::new("alice".to_string(), AccountType::User);
        assert!(account.account_secret.is_none());
        assert!(account.is_active);
    }

    #[test]
    fn service_accounts_get_a_secret() {
        let account = Account::new("billing".to_string(), AccountType::InternalService);
        let secret = account.account_secret.expect("secret missing");
        assert_eq!(secret.len(), 64);
    }
}
