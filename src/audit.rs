//! Admin Audit Trail
//!
//! Append-only records of administrative operations. Every admin entry
//! point writes one record here before returning; nothing ever deletes
//! them, including the platform reset.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::logging::log_admin_action;
use crate::storage::{AuditStore, StorageResult};

/// One administrative action, as recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAction {
    /// Unique record ID
    pub id: String,
    /// Who performed the action
    pub actor: String,
    /// What was done, e.g. "credit_balance"
    pub action: String,
    /// Action-specific details
    pub details: serde_json::Value,
    /// Unix timestamp when the action was recorded
    pub timestamp: u64,
}

impl AdminAction {
    pub fn new(actor: &str, action: &str, details: serde_json::Value) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            details,
            timestamp,
        }
    }
}

/// Writer/reader over the audit store
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Record one admin action and return it.
    pub async fn record(
        &self,
        actor: &str,
        action: &str,
        details: serde_json::Value,
    ) -> StorageResult<AdminAction> {
        let entry = AdminAction::new(actor, action, details);
        self.store.append(&entry).await?;
        log_admin_action(actor, action, &entry.details);
        Ok(entry)
    }

    /// All recorded actions, oldest first.
    pub async fn entries(&self) -> StorageResult<Vec<AdminAction>> {
        self.store.entries().await
    }
}
