//! Append-only audit chain.
//!
//! Business operations enqueue events and return immediately; a single
//! consumer task links each event to the entity's current head entry and
//! advances the head, which keeps every entity's chain ordered even though
//! the triggering writes race under optimistic concurrency. Persistence
//! failures never fail the triggering operation; they are reported on the
//! error log for operator remediation.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::context::RequestContext;
use super::ServiceError;
use crate::models::{AuditOperation, AuditTrailEntry, EntityKind};
use crate::store::IdentityStore;

enum AuditMessage {
    Record(Box<PendingEntry>),
    /// Test/shutdown aid: acknowledged once every prior message is persisted.
    Flush(oneshot::Sender<()>),
}

struct PendingEntry {
    operation: AuditOperation,
    entity_kind: EntityKind,
    entity_id: String,
    actor_id: String,
    actor_name: String,
    payload: serde_json::Value,
    delta: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::UnboundedSender<AuditMessage>,
}

impl AuditRecorder {
    /// Spawn the consumer task and hand back the sender half.
    pub fn spawn(store: Arc<dyn IdentityStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditMessage>();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    AuditMessage::Record(pending) => {
                        if let Err(e) = persist(store.as_ref(), &pending).await {
                            tracing::error!(
                                error = %e,
                                entity_kind = %pending.entity_kind.as_str(),
                                entity_id = %pending.entity_id,
                                "audit entry lost; operator attention required"
                            );
                        }
                    }
                    AuditMessage::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Enqueue an audit event; never blocks and never fails the caller.
    pub fn record(
        &self,
        ctx: &RequestContext,
        operation: AuditOperation,
        entity_kind: EntityKind,
        entity_id: &str,
        payload: serde_json::Value,
        delta: Option<serde_json::Value>,
    ) {
        let pending = PendingEntry {
            operation,
            entity_kind,
            entity_id: entity_id.to_string(),
            actor_id: ctx.actor_id.clone(),
            actor_name: ctx.actor_name.clone(),
            payload,
            delta,
        };
        if self.tx.send(AuditMessage::Record(Box::new(pending))).is_err() {
            tracing::error!(
                entity_kind = %entity_kind.as_str(),
                entity_id = %entity_id,
                "audit consumer gone; entry dropped"
            );
        }
    }

    /// Wait until everything enqueued so far has been persisted.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(AuditMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn persist(store: &dyn IdentityStore, pending: &PendingEntry) -> Result<(), ServiceError> {
    let head = store
        .audit_head(pending.entity_kind, &pending.entity_id)
        .await?;
    let entry = AuditTrailEntry::new(
        pending.operation,
        pending.entity_kind,
        pending.entity_id.clone(),
        pending.actor_id.clone(),
        pending.actor_name.clone(),
        pending.payload.clone(),
        pending.delta.clone(),
        head,
    );
    store.append_audit_entry(entry.clone()).await?;
    store
        .set_audit_head(pending.entity_kind, &pending.entity_id, &entry.id)
        .await?;
    Ok(())
}

/// Walk the chain from the entity's newest entry back to its creation.
pub async fn history(
    store: &dyn IdentityStore,
    kind: EntityKind,
    entity_id: &str,
) -> Result<Vec<AuditTrailEntry>, ServiceError> {
    let mut entries = Vec::new();
    let mut cursor = store.audit_head(kind, entity_id).await?;
    while let Some(id) = cursor {
        let entry = store
            .get_audit_entry(&id)
            .await?
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("broken audit link: {}", id)))?;
        cursor = entry.previous_trail_id.clone();
        entries.push(entry);
    }
    Ok(entries)
}
