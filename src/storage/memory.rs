//! In-Memory Storage Implementations
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the service restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{
    AccountStore, AuditStore, StorageError, StorageResult, WithdrawalStore,
};
use crate::audit::AdminAction;
use crate::types::account::{DepositEvent, UserAccount};
use crate::withdrawal::{WithdrawalRequest, WithdrawalStatus};

/// In-memory account store
///
/// Thread-safe storage for user accounts and deposit events.
/// Uses Arc<RwLock<>> for concurrent access.
#[derive(Clone)]
pub struct MemoryAccountStore {
    /// Accounts indexed by principal
    accounts: Arc<RwLock<HashMap<String, UserAccount>>>,
    /// Index: deposit address -> principal
    by_address: Arc<RwLock<HashMap<String, String>>>,
    /// Deposit events indexed by deposit reference
    deposit_events: Arc<RwLock<HashMap<String, DepositEvent>>>,
}

impl MemoryAccountStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            by_address: Arc::new(RwLock::new(HashMap::new())),
            deposit_events: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn insert(&self, account: &UserAccount) -> StorageResult<()> {
        let mut accounts = self.accounts.write().await;
        let mut by_address = self.by_address.write().await;

        // Check for duplicate principal
        if accounts.contains_key(&account.principal) {
            return Err(StorageError::Duplicate(format!(
                "principal: {}",
                account.principal
            )));
        }

        // Check for duplicate deposit address
        if let Some(address) = &account.deposit_address {
            if by_address.contains_key(address) {
                return Err(StorageError::Duplicate(format!("address: {}", address)));
            }
            by_address.insert(address.clone(), account.principal.clone());
        }

        accounts.insert(account.principal.clone(), account.clone());
        Ok(())
    }

    async fn update(&self, account: &UserAccount) -> StorageResult<()> {
        let mut accounts = self.accounts.write().await;
        let mut by_address = self.by_address.write().await;

        if !accounts.contains_key(&account.principal) {
            return Err(StorageError::NotFound(account.principal.clone()));
        }

        // Addresses are assigned once, so the index only ever grows
        if let Some(address) = &account.deposit_address {
            by_address.insert(address.clone(), account.principal.clone());
        }

        accounts.insert(account.principal.clone(), account.clone());
        Ok(())
    }

    async fn get(&self, principal: &str) -> StorageResult<Option<UserAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(principal).cloned())
    }

    async fn get_by_address(&self, address: &str) -> StorageResult<Option<UserAccount>> {
        let by_address = self.by_address.read().await;
        let principal = match by_address.get(address) {
            Some(principal) => principal.clone(),
            None => return Ok(None),
        };
        drop(by_address);

        let accounts = self.accounts.read().await;
        Ok(accounts.get(&principal).cloned())
    }

    async fn get_all(&self) -> StorageResult<Vec<UserAccount>> {
        let accounts = self.accounts.read().await;
        let mut all: Vec<UserAccount> = accounts.values().cloned().collect();
        all.sort_by(|a, b| a.principal.cmp(&b.principal));
        Ok(all)
    }

    async fn delete(&self, principal: &str) -> StorageResult<bool> {
        let mut accounts = self.accounts.write().await;
        let mut by_address = self.by_address.write().await;

        match accounts.remove(principal) {
            Some(account) => {
                if let Some(address) = &account.deposit_address {
                    by_address.remove(address);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self) -> StorageResult<usize> {
        let accounts = self.accounts.read().await;
        Ok(accounts.len())
    }

    async fn insert_deposit_event(&self, event: &DepositEvent) -> StorageResult<()> {
        let mut deposit_events = self.deposit_events.write().await;

        if deposit_events.contains_key(&event.deposit_ref) {
            return Err(StorageError::Duplicate(format!(
                "deposit_ref: {}",
                event.deposit_ref
            )));
        }

        deposit_events.insert(event.deposit_ref.clone(), event.clone());
        Ok(())
    }

    async fn deposit_events_for(&self, principal: &str) -> StorageResult<Vec<DepositEvent>> {
        let deposit_events = self.deposit_events.read().await;
        let mut events: Vec<DepositEvent> = deposit_events
            .values()
            .filter(|e| e.principal == principal)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.credited_at
                .cmp(&b.credited_at)
                .then_with(|| a.deposit_ref.cmp(&b.deposit_ref))
        });
        Ok(events)
    }

    async fn delete_deposit_events_for(&self, principal: &str) -> StorageResult<u64> {
        let mut deposit_events = self.deposit_events.write().await;

        let refs: Vec<String> = deposit_events
            .values()
            .filter(|e| e.principal == principal)
            .map(|e| e.deposit_ref.clone())
            .collect();

        let count = refs.len() as u64;
        for deposit_ref in refs {
            deposit_events.remove(&deposit_ref);
        }

        Ok(count)
    }

    async fn clear(&self) -> StorageResult<()> {
        self.accounts.write().await.clear();
        self.by_address.write().await.clear();
        self.deposit_events.write().await.clear();
        Ok(())
    }
}

/// In-memory withdrawal request store
#[derive(Clone)]
pub struct MemoryWithdrawalStore {
    /// Requests indexed by ID
    records: Arc<RwLock<HashMap<u64, WithdrawalRequest>>>,
}

impl MemoryWithdrawalStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryWithdrawalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WithdrawalStore for MemoryWithdrawalStore {
    async fn insert(&self, request: &WithdrawalRequest) -> StorageResult<()> {
        let mut records = self.records.write().await;

        if records.contains_key(&request.id()) {
            return Err(StorageError::Duplicate(format!("ID: {}", request.id())));
        }

        records.insert(request.id(), request.clone());
        Ok(())
    }

    async fn update(&self, request: &WithdrawalRequest) -> StorageResult<()> {
        let mut records = self.records.write().await;

        if !records.contains_key(&request.id()) {
            return Err(StorageError::NotFound(request.id().to_string()));
        }

        records.insert(request.id(), request.clone());
        Ok(())
    }

    async fn get(&self, id: u64) -> StorageResult<Option<WithdrawalRequest>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn get_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> StorageResult<Vec<WithdrawalRequest>> {
        let records = self.records.read().await;
        let mut matching: Vec<WithdrawalRequest> = records
            .values()
            .filter(|r| r.status() == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.id());
        Ok(matching)
    }

    async fn get_for_user(&self, principal: &str) -> StorageResult<Vec<WithdrawalRequest>> {
        let records = self.records.read().await;
        let mut matching: Vec<WithdrawalRequest> = records
            .values()
            .filter(|r| r.principal() == principal)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.id());
        Ok(matching)
    }

    async fn get_all(&self) -> StorageResult<Vec<WithdrawalRequest>> {
        let records = self.records.read().await;
        let mut all: Vec<WithdrawalRequest> = records.values().cloned().collect();
        all.sort_by_key(|r| r.id());
        Ok(all)
    }

    async fn max_id(&self) -> StorageResult<u64> {
        let records = self.records.read().await;
        Ok(records.keys().max().copied().unwrap_or(0))
    }

    async fn clear(&self) -> StorageResult<()> {
        self.records.write().await.clear();
        Ok(())
    }
}

/// In-memory audit store. Append-only, like its SQLite counterpart.
#[derive(Clone)]
pub struct MemoryAuditStore {
    entries: Arc<RwLock<Vec<AdminAction>>>,
}

impl MemoryAuditStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AdminAction) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        entries.push(entry.clone());
        Ok(())
    }

    async fn entries(&self) -> StorageResult<Vec<AdminAction>> {
        let entries = self.entries.read().await;
        Ok(entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_account(principal: &str, address: Option<&str>) -> UserAccount {
        let mut account = UserAccount::new(principal);
        if let Some(address) = address {
            account.assign_wallet(address.to_string(), 0);
        }
        account
    }

    fn create_test_withdrawal(id: u64, principal: &str) -> WithdrawalRequest {
        WithdrawalRequest::from_parts(
            id,
            principal.to_string(),
            50_000,
            "tb1q_test_dest".to_string(),
            WithdrawalStatus::Pending,
            id,
            1_700_000_000,
            1_700_000_000,
            None,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_account() {
        let store = MemoryAccountStore::new();
        let account = create_test_account("user-1", Some("tb1q_addr1"));

        store.insert(&account).await.unwrap();

        let retrieved = store.get("user-1").await.unwrap().unwrap();
        assert_eq!(retrieved.principal, "user-1");
        assert_eq!(retrieved.deposit_address.as_deref(), Some("tb1q_addr1"));
    }

    #[tokio::test]
    async fn test_get_account_by_address() {
        let store = MemoryAccountStore::new();
        let account = create_test_account("user-1", Some("tb1q_lookup"));

        store.insert(&account).await.unwrap();

        let retrieved = store.get_by_address("tb1q_lookup").await.unwrap().unwrap();
        assert_eq!(retrieved.principal, "user-1");
    }

    #[tokio::test]
    async fn test_duplicate_principal_error() {
        let store = MemoryAccountStore::new();
        let account1 = create_test_account("user-1", None);
        let account2 = create_test_account("user-1", None);

        store.insert(&account1).await.unwrap();
        let result = store.insert(&account2).await;

        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_duplicate_address_error() {
        let store = MemoryAccountStore::new();
        let account1 = create_test_account("user-1", Some("tb1q_same"));
        let account2 = create_test_account("user-2", Some("tb1q_same"));

        store.insert(&account1).await.unwrap();
        let result = store.insert(&account2).await;

        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_update_indexes_new_address() {
        let store = MemoryAccountStore::new();
        let mut account = create_test_account("user-1", None);
        store.insert(&account).await.unwrap();

        assert!(store.get_by_address("tb1q_later").await.unwrap().is_none());

        account.assign_wallet("tb1q_later".to_string(), 3);
        store.update(&account).await.unwrap();

        let retrieved = store.get_by_address("tb1q_later").await.unwrap().unwrap();
        assert_eq!(retrieved.derivation_index, Some(3));
    }

    #[tokio::test]
    async fn test_update_missing_account() {
        let store = MemoryAccountStore::new();
        let account = create_test_account("ghost", None);

        let result = store.update(&account).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_address_index() {
        let store = MemoryAccountStore::new();
        let account = create_test_account("user-1", Some("tb1q_gone"));
        store.insert(&account).await.unwrap();

        assert!(store.delete("user-1").await.unwrap());
        assert!(!store.delete("user-1").await.unwrap());
        assert!(store.get_by_address("tb1q_gone").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deposit_event_replay_is_duplicate() {
        let store = MemoryAccountStore::new();
        let event = DepositEvent::new("txid:0", "user-1", 100_000);

        store.insert_deposit_event(&event).await.unwrap();
        let result = store.insert_deposit_event(&event).await;

        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_deposit_events_filtered_by_principal() {
        let store = MemoryAccountStore::new();
        store
            .insert_deposit_event(&DepositEvent::new("txa:0", "user-1", 1_000))
            .await
            .unwrap();
        store
            .insert_deposit_event(&DepositEvent::new("txb:0", "user-2", 2_000))
            .await
            .unwrap();
        store
            .insert_deposit_event(&DepositEvent::new("txc:1", "user-1", 3_000))
            .await
            .unwrap();

        let events = store.deposit_events_for("user-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.principal == "user-1"));

        let removed = store.delete_deposit_events_for("user-1").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.deposit_events_for("user-1").await.unwrap().is_empty());
        assert_eq!(store.deposit_events_for("user-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_withdrawal_insert_get_update() {
        let store = MemoryWithdrawalStore::new();
        let request = create_test_withdrawal(1, "user-1");

        store.insert(&request).await.unwrap();
        assert!(matches!(
            store.insert(&request).await,
            Err(StorageError::Duplicate(_))
        ));

        let retrieved = store.get(1).await.unwrap().unwrap();
        assert_eq!(retrieved.principal(), "user-1");
        assert_eq!(retrieved.status(), WithdrawalStatus::Pending);
    }

    #[tokio::test]
    async fn test_withdrawal_queries() {
        let store = MemoryWithdrawalStore::new();
        store
            .insert(&create_test_withdrawal(1, "user-1"))
            .await
            .unwrap();
        store
            .insert(&create_test_withdrawal(2, "user-2"))
            .await
            .unwrap();
        store
            .insert(&create_test_withdrawal(5, "user-1"))
            .await
            .unwrap();

        let pending = store
            .get_by_status(WithdrawalStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);

        let mine = store.get_for_user("user-1").await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id(), 1);
        assert_eq!(mine[1].id(), 5);

        assert_eq!(store.max_id().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_withdrawal_max_id_empty() {
        let store = MemoryWithdrawalStore::new();
        assert_eq!(store.max_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_audit_entries_keep_insertion_order() {
        let store = MemoryAuditStore::new();
        store
            .append(&AdminAction::new("ops", "first", serde_json::json!({})))
            .await
            .unwrap();
        store
            .append(&AdminAction::new("ops", "second", serde_json::json!({})))
            .await
            .unwrap();

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "first");
        assert_eq!(entries[1].action, "second");
    }
}
