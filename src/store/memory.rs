use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{IdentityStore, StoreError};
use crate::models::{
    new_etag, Account, AuditTrailEntry, AuthMethod, AuthRecord, EntityKind, LdapDomain,
    RefreshTokenRecord, TwoFactorChallenge, VerificationToken,
};

/// In-process store. Compare-and-swap updates run under a per-key
/// `DashMap` entry lock; auth-record writes additionally serialize through
/// one mutex so the natural-key index and the record move together.
#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<String, Account>,
    auths: DashMap<String, AuthRecord>,
    auth_keys: DashMap<String, String>,
    auth_serials: DashMap<String, String>,
    auth_write: Mutex<()>,
    domains: DashMap<String, LdapDomain>,
    refresh_tokens: DashMap<String, RefreshTokenRecord>,
    verification_tokens: DashMap<String, VerificationToken>,
    challenges: DashMap<String, TwoFactorChallenge>,
    audit_entries: DashMap<String, AuditTrailEntry>,
    audit_heads: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn head_key(kind: EntityKind, entity_id: &str) -> String {
        format!("{}:{}", kind.as_str(), entity_id)
    }

    fn serial_of(method: &AuthMethod) -> Option<String> {
        match method {
            AuthMethod::Certificate(c) => Some(c.serial_number.to_lowercase()),
            _ => None,
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create_account(&self, mut account: Account) -> Result<Account, StoreError> {
        account.etag = new_etag();
        account.last_update = Utc::now();
        match self.accounts.entry(account.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(account.id)),
            Entry::Vacant(v) => {
                v.insert(account.clone());
                Ok(account)
            }
        }
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(id).map(|r| r.clone()))
    }

    async fn update_account(
        &self,
        expected_etag: &str,
        mut account: Account,
    ) -> Result<Account, StoreError> {
        match self.accounts.entry(account.id.clone()) {
            Entry::Vacant(_) => Err(StoreError::NotFound),
            Entry::Occupied(mut o) => {
                if o.get().etag != expected_etag {
                    return Err(StoreError::ConcurrencyConflict);
                }
                account.etag = new_etag();
                account.last_update = Utc::now();
                o.insert(account.clone());
                Ok(account)
            }
        }
    }

    async fn create_auth(&self, mut auth: AuthRecord) -> Result<AuthRecord, StoreError> {
        let _guard = self.auth_write.lock().await;

        // All rejections happen before any index write so a failed create
        // leaves nothing behind.
        let key = auth.method.natural_key();
        if auth.is_active {
            if let Some(existing) = self.auth_keys.get(&key) {
                if *existing != auth.id {
                    return Err(StoreError::DuplicateKey(key));
                }
            }
        }
        let serial = Self::serial_of(&auth.method);
        if let Some(serial) = &serial {
            if let Some(existing) = self.auth_serials.get(serial) {
                if *existing != auth.id {
                    return Err(StoreError::DuplicateKey(serial.clone()));
                }
            }
        }
        if self.auths.contains_key(&auth.id) {
            return Err(StoreError::DuplicateKey(auth.id));
        }

        auth.etag = new_etag();
        auth.last_update = Utc::now();
        if auth.is_active {
            self.auth_keys.insert(key, auth.id.clone());
        }
        if let Some(serial) = serial {
            self.auth_serials.insert(serial, auth.id.clone());
        }
        self.auths.insert(auth.id.clone(), auth.clone());
        Ok(auth)
    }

    async fn get_auth(&self, id: &str) -> Result<Option<AuthRecord>, StoreError> {
        Ok(self.auths.get(id).map(|r| r.clone()))
    }

    async fn update_auth(
        &self,
        expected_etag: &str,
        mut auth: AuthRecord,
    ) -> Result<AuthRecord, StoreError> {
        let _guard = self.auth_write.lock().await;

        let existing = match self.auths.get(&auth.id) {
            Some(r) => r.clone(),
            None => return Err(StoreError::NotFound),
        };
        if existing.etag != expected_etag {
            return Err(StoreError::ConcurrencyConflict);
        }
        if existing.account_id != auth.account_id {
            return Err(StoreError::Invalid(
                "auth records cannot move between accounts".to_string(),
            ));
        }
        // Revocation is monotonic.
        if let (AuthMethod::Certificate(old), AuthMethod::Certificate(new)) =
            (&existing.method, &auth.method)
        {
            if old.is_revoked && !new.is_revoked {
                return Err(StoreError::Invalid(
                    "certificate revocation cannot be cleared".to_string(),
                ));
            }
        }

        let old_key = existing.method.natural_key();
        let new_key = auth.method.natural_key();
        if auth.is_active && (new_key != old_key || !existing.is_active) {
            if let Some(owner) = self.auth_keys.get(&new_key) {
                if *owner != auth.id {
                    return Err(StoreError::DuplicateKey(new_key));
                }
            }
        }

        if existing.is_active && (!auth.is_active || new_key != old_key) {
            self.auth_keys.remove(&old_key);
        }
        if auth.is_active {
            self.auth_keys.insert(new_key, auth.id.clone());
        }

        auth.etag = new_etag();
        auth.last_update = Utc::now();
        self.auths.insert(auth.id.clone(), auth.clone());
        Ok(auth)
    }

    async fn find_auth_by_natural_key(
        &self,
        key: &str,
    ) -> Result<Option<AuthRecord>, StoreError> {
        let id = match self.auth_keys.get(key) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(self.auths.get(&id).map(|r| r.clone()))
    }

    async fn list_auths_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<AuthRecord>, StoreError> {
        Ok(self
            .auths
            .iter()
            .filter(|r| r.account_id == account_id)
            .map(|r| r.clone())
            .collect())
    }

    async fn create_domain(&self, mut domain: LdapDomain) -> Result<LdapDomain, StoreError> {
        domain.etag = new_etag();
        domain.last_update = Utc::now();
        let clash = self
            .domains
            .iter()
            .any(|d| d.matches_identifier(&domain.name) || d.matches_identifier(&domain.netbios_name));
        if clash {
            return Err(StoreError::DuplicateKey(domain.name));
        }
        match self.domains.entry(domain.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(domain.id)),
            Entry::Vacant(v) => {
                v.insert(domain.clone());
                Ok(domain)
            }
        }
    }

    async fn get_domain(&self, id: &str) -> Result<Option<LdapDomain>, StoreError> {
        Ok(self.domains.get(id).map(|r| r.clone()))
    }

    async fn update_domain(
        &self,
        expected_etag: &str,
        mut domain: LdapDomain,
    ) -> Result<LdapDomain, StoreError> {
        match self.domains.entry(domain.id.clone()) {
            Entry::Vacant(_) => Err(StoreError::NotFound),
            Entry::Occupied(mut o) => {
                if o.get().etag != expected_etag {
                    return Err(StoreError::ConcurrencyConflict);
                }
                domain.etag = new_etag();
                domain.last_update = Utc::now();
                o.insert(domain.clone());
                Ok(domain)
            }
        }
    }

    async fn find_domain_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<LdapDomain>, StoreError> {
        Ok(self
            .domains
            .iter()
            .find(|d| d.matches_identifier(identifier))
            .map(|d| d.clone()))
    }

    async fn list_domains(&self) -> Result<Vec<LdapDomain>, StoreError> {
        Ok(self.domains.iter().map(|d| d.clone()).collect())
    }

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        self.refresh_tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        match self.refresh_tokens.entry(token_hash.to_string()) {
            Entry::Vacant(_) => Err(StoreError::NotFound),
            Entry::Occupied(mut o) => {
                let record = o.get_mut();
                if record.used || now > record.expires_at {
                    return Err(StoreError::NotFound);
                }
                record.used = true;
                Ok(record.clone())
            }
        }
    }

    async fn revoke_refresh_tokens_for_account(
        &self,
        account_id: &str,
    ) -> Result<(), StoreError> {
        for mut record in self.refresh_tokens.iter_mut() {
            if record.account_id == account_id {
                record.used = true;
            }
        }
        Ok(())
    }

    async fn insert_verification_token(
        &self,
        token: VerificationToken,
    ) -> Result<(), StoreError> {
        self.verification_tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn take_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<VerificationToken>, StoreError> {
        Ok(self.verification_tokens.remove(token).map(|(_, v)| v))
    }

    async fn insert_challenge(&self, challenge: TwoFactorChallenge) -> Result<(), StoreError> {
        self.challenges.insert(challenge.id.clone(), challenge);
        Ok(())
    }

    async fn get_challenge(&self, id: &str) -> Result<Option<TwoFactorChallenge>, StoreError> {
        Ok(self.challenges.get(id).map(|r| r.clone()))
    }

    async fn record_challenge_attempt(&self, id: &str) -> Result<u32, StoreError> {
        match self.challenges.entry(id.to_string()) {
            Entry::Vacant(_) => Err(StoreError::NotFound),
            Entry::Occupied(mut o) => {
                let challenge = o.get_mut();
                challenge.attempts += 1;
                Ok(challenge.attempts)
            }
        }
    }

    async fn remove_challenge(&self, id: &str) -> Result<(), StoreError> {
        self.challenges.remove(id);
        Ok(())
    }

    async fn append_audit_entry(&self, entry: AuditTrailEntry) -> Result<(), StoreError> {
        match self.audit_entries.entry(entry.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Invalid(
                "audit entries are immutable once written".to_string(),
            )),
            Entry::Vacant(v) => {
                v.insert(entry);
                Ok(())
            }
        }
    }

    async fn get_audit_entry(&self, id: &str) -> Result<Option<AuditTrailEntry>, StoreError> {
        Ok(self.audit_entries.get(id).map(|r| r.clone()))
    }

    async fn audit_head(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .audit_heads
            .get(&Self::head_key(kind, entity_id))
            .map(|r| r.clone()))
    }

    async fn set_audit_head(
        &self,
        kind: EntityKind,
        entity_id: &str,
        trail_id: &str,
    ) -> Result<(), StoreError> {
        self.audit_heads
            .insert(Self::head_key(kind, entity_id), trail_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, CertificateAuth, DirectoryAuth, EmailAuth, TwoFactorMethod};
    use chrono::{Duration, NaiveDate};

    fn cert_auth(account_id: &str, thumbprint: &str, serial: &str) -> AuthRecord {
        AuthRecord::new(
            account_id.to_string(),
            AuthMethod::Certificate(CertificateAuth {
                thumbprint: thumbprint.to_string(),
                serial_number: serial.to_string(),
                issuer: "CN=test-ca".to_string(),
                subject: "CN=client".to_string(),
                public_key_hash: "pk".to_string(),
                valid_from: Utc::now() - Duration::days(1),
                valid_until: Utc::now() + Duration::days(365),
                is_revoked: false,
                revocation_reason: None,
                revoked_at: None,
            }),
        )
    }

    fn email_auth(account_id: &str, email: &str) -> AuthRecord {
        AuthRecord::new(
            account_id.to_string(),
            AuthMethod::Email(EmailAuth {
                email: email.to_string(),
                is_email_confirmed: true,
                password_expires_at: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                password_hash: "h".to_string(),
                password_salt: "s".to_string(),
                password_history: Vec::new(),
            }),
        )
    }

    #[tokio::test]
    async fn stale_etag_update_is_rejected() {
        let store = MemoryStore::new();
        let account = store
            .create_account(Account::new("a".to_string(), AccountType::User))
            .await
            .unwrap();

        let first = store
            .update_account(&account.etag, account.clone())
            .await
            .unwrap();
        assert_ne!(first.etag, account.etag);

        // Reusing the original etag must now fail.
        let err = store
            .update_account(&account.etag, account.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict));
    }

    #[tokio::test]
    async fn natural_key_is_unique_among_active_records() {
        let store = MemoryStore::new();
        store
            .create_auth(email_auth("acc-1", "a@x.com"))
            .await
            .unwrap();
        let err = store
            .create_auth(email_auth("acc-2", "A@X.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn deactivation_releases_the_natural_key() {
        let store = MemoryStore::new();
        let mut auth = store
            .create_auth(email_auth("acc-1", "a@x.com"))
            .await
            .unwrap();
        auth.is_active = false;
        let etag = auth.etag.clone();
        store.update_auth(&etag, auth).await.unwrap();

        store
            .create_auth(email_auth("acc-2", "a@x.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refresh_token_consume_has_one_winner() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let record = RefreshTokenRecord::new("acc-1".to_string(), "tok", 7);
        let hash = record.token_hash.clone();
        store.insert_refresh_token(record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let hash = hash.clone();
            handles.push(tokio::spawn(async move {
                store.consume_refresh_token(&hash, Utc::now()).await.is_ok()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn certificate_serials_are_unique() {
        let store = MemoryStore::new();
        store
            .create_auth(cert_auth("acc-1", "aa11", "serial-1"))
            .await
            .unwrap();
        let err = store
            .create_auth(cert_auth("acc-2", "bb22", "SERIAL-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn failed_create_leaves_no_serial_index_entry() {
        let store = MemoryStore::new();
        let first = cert_auth("acc-1", "aa11", "serial-1");
        store.create_auth(first.clone()).await.unwrap();

        // Reusing the record id is rejected...
        let mut clash = cert_auth("acc-2", "bb22", "serial-2");
        clash.id = first.id.clone();
        let err = store.create_auth(clash).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));

        // ...and the rejected write must not have claimed its serial.
        store
            .create_auth(cert_auth("acc-2", "bb22", "serial-2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn challenge_attempts_count_every_concurrent_miss() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let challenge = TwoFactorChallenge::new(
            "auth-1".to_string(),
            "acc-1".to_string(),
            TwoFactorMethod::Sms,
            Some("h".to_string()),
            300,
        );
        let id = challenge.id.clone();
        store.insert_challenge(challenge).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.record_challenge_attempt(&id).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stored = store.get_challenge(&id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 8);
    }

    #[tokio::test]
    async fn directory_key_lookup_roundtrip() {
        let store = MemoryStore::new();
        let auth = AuthRecord::new(
            "acc-1".to_string(),
            AuthMethod::ActiveDirectory(DirectoryAuth {
                ldap_domain_id: "dom-1".to_string(),
                directory_username: "bob".to_string(),
            }),
        );
        store.create_auth(auth.clone()).await.unwrap();
        let found = store
            .find_auth_by_natural_key("ad:dom-1:bob")
            .await
            .unwrap()
            .expect("mapping missing");
        assert_eq!(found.id, auth.id);
    }
}
