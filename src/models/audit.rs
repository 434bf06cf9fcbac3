use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Auth,
    LdapDomain,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Auth => "auth",
            EntityKind::LdapDomain => "ldap_domain",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(EntityKind::Account),
            "auth" => Ok(EntityKind::Auth),
            "ldap_domain" => Ok(EntityKind::LdapDomain),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// One link in an entity's append-only mutation history. `previous_trail_id`
/// points at the entity's prior head entry; walking it from the newest entry
/// reconstructs the complete history back to creation. Entries are never
/// mutated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrailEntry {
    pub id: String,
    pub operation: AuditOperation,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub actor_id: String,
    pub actor_name: String,
    /// Full snapshot of the entity after the mutation.
    pub payload: serde_json::Value,
    /// Changed fields only, when the caller computed them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<serde_json::Value>,
    pub previous_trail_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditTrailEntry {
    pub fn new(
        operation: AuditOperation,
        entity_kind: EntityKind,
        entity_id: String,
        actor_id: String,
        actor_name: String,
        payload: serde_json::Value,
        delta: Option<serde_json::Value>,
        previous_trail_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            entity_kind,
            entity_id,
            actor_id,
            actor_name,
            payload,
            delta,
            previous_trail_id,
            timestamp: Utc::now(),
        }
    }
}
