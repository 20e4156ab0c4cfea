//! Withdrawal Workflow
//!
//! Drives withdrawal requests through the approval lifecycle:
//!
//! ```text
//! Pending -> Approved -> Processed
//!    |           |
//!    +-----------+-----> Rejected
//! ```
//!
//! Requesting a withdrawal reserves funds on the ledger. Approval is a
//! pure review step and never touches the ledger. Rejection releases
//! the reservation; processing commits it. Terminal states accept no
//! further transitions and a refused transition never moves funds.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitcoin::{Address, Network};
use thiserror::Error;
use tokio::sync::Mutex;

use super::types::{WithdrawalRequest, WithdrawalStats, WithdrawalStatus};
use crate::ledger::{BalanceLedger, LedgerError, Reservation};
use crate::logging::log_withdrawal_event;
use crate::storage::{StorageError, WithdrawalStore};

/// Workflow errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No request with this ID
    #[error("withdrawal not found: {0}")]
    NotFound(u64),

    /// Amount failed validation
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Destination address failed validation
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The requested transition is not legal from the current status
    #[error("invalid transition for withdrawal {id}: cannot {action} a {from} request")]
    InvalidTransition {
        id: u64,
        from: WithdrawalStatus,
        action: &'static str,
    },

    /// Ledger refused the operation
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Underlying storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl WorkflowError {
    /// Stable machine-readable code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "WITHDRAWAL_NOT_FOUND",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Ledger(e) => e.error_code(),
            Self::Storage(e) => e.error_code(),
        }
    }
}

/// The withdrawal workflow
pub struct WithdrawalWorkflow {
    store: Arc<dyn WithdrawalStore>,
    ledger: Arc<BalanceLedger>,
    network: Network,
    /// Next request ID to hand out
    next_id: AtomicU64,
    /// Serializes status transitions so two operators cannot race one
    /// request into conflicting states
    transition_lock: Mutex<()>,
}

impl WithdrawalWorkflow {
    /// Create a workflow over the given store and ledger.
    ///
    /// Reads the highest stored request ID so newly assigned IDs
    /// continue the sequence after a restart.
    pub async fn new(
        store: Arc<dyn WithdrawalStore>,
        ledger: Arc<BalanceLedger>,
        network: Network,
    ) -> Result<Self, WorkflowError> {
        let max_id = store.max_id().await?;

        Ok(Self {
            store,
            ledger,
            network,
            next_id: AtomicU64::new(max_id + 1),
            transition_lock: Mutex::new(()),
        })
    }

    /// Re-open ledger reservations for every non-terminal request.
    ///
    /// Called once at startup: reservations live in memory, so after a
    /// restart the stored Pending/Approved requests are the source of
    /// truth for what is still held aside. Returns the number of
    /// reservations recovered.
    pub async fn rehydrate(&self) -> Result<usize, WorkflowError> {
        let mut recovered = 0;

        for request in self.store.get_all().await? {
            if request.is_terminal() {
                continue;
            }

            self.ledger
                .recover_reservation(Reservation {
                    id: request.reservation_id(),
                    principal: request.principal().to_string(),
                    amount_sats: request.amount_sats(),
                    created_at: request.created_at(),
                })
                .await;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(
                target: "btcopts::withdrawal",
                recovered,
                "re-opened reservations for in-flight withdrawals"
            );
        }

        Ok(recovered)
    }

    /// Submit a withdrawal request, reserving the funds.
    ///
    /// Ledger refusals (insufficient balance, unknown account) pass
    /// through unchanged.
    pub async fn request(
        &self,
        principal: &str,
        amount_sats: u64,
        to_address: &str,
    ) -> Result<WithdrawalRequest, WorkflowError> {
        if amount_sats == 0 {
            return Err(WorkflowError::InvalidAmount(
                "withdrawal amount must be positive".to_string(),
            ));
        }
        self.validate_address(to_address)?;

        let reservation = self.ledger.reserve(principal, amount_sats).await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = WithdrawalRequest::new(
            id,
            principal.to_string(),
            amount_sats,
            to_address.to_string(),
            reservation.id,
        );

        if let Err(e) = self.store.insert(&request).await {
            // Do not strand the funds if the record cannot be written
            let _ = self.ledger.release_reservation(reservation.id).await;
            return Err(e.into());
        }

        log_withdrawal_event("requested", id, principal, amount_sats, to_address, None);
        Ok(request)
    }

    /// Approve a pending request. Review only: the ledger is untouched.
    pub async fn approve(&self, id: u64) -> Result<WithdrawalRequest, WorkflowError> {
        let _guard = self.transition_lock.lock().await;

        let mut request = self.get(id).await?;
        if !request.can_approve() {
            return Err(WorkflowError::InvalidTransition {
                id,
                from: request.status(),
                action: "approve",
            });
        }

        request.mark_approved();
        self.store.update(&request).await?;

        log_withdrawal_event(
            "approved",
            id,
            request.principal(),
            request.amount_sats(),
            request.to_address(),
            None,
        );
        Ok(request)
    }

    /// Reject a pending or approved request, releasing its reservation.
    pub async fn reject(
        &self,
        id: u64,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest, WorkflowError> {
        let _guard = self.transition_lock.lock().await;

        let mut request = self.get(id).await?;
        if !request.can_reject() {
            return Err(WorkflowError::InvalidTransition {
                id,
                from: request.status(),
                action: "reject",
            });
        }

        self.ledger
            .release_reservation(request.reservation_id())
            .await?;

        request.mark_rejected(reason);
        self.store.update(&request).await?;

        log_withdrawal_event(
            "rejected",
            id,
            request.principal(),
            request.amount_sats(),
            request.to_address(),
            None,
        );
        Ok(request)
    }

    /// Mark an approved request as broadcast, committing its
    /// reservation as a completed withdrawal.
    pub async fn mark_processed(
        &self,
        id: u64,
        tx_hash: &str,
    ) -> Result<WithdrawalRequest, WorkflowError> {
        let _guard = self.transition_lock.lock().await;

        let mut request = self.get(id).await?;
        if !request.can_process() {
            return Err(WorkflowError::InvalidTransition {
                id,
                from: request.status(),
                action: "process",
            });
        }

        self.ledger
            .commit_reservation(request.reservation_id(), tx_hash)
            .await?;

        request.mark_processed(tx_hash.to_string());
        self.store.update(&request).await?;

        log_withdrawal_event(
            "processed",
            id,
            request.principal(),
            request.amount_sats(),
            request.to_address(),
            Some(tx_hash),
        );
        Ok(request)
    }

    /// Get a request by ID
    pub async fn get(&self, id: u64) -> Result<WithdrawalRequest, WorkflowError> {
        self.store
            .get(id)
            .await?
            .ok_or(WorkflowError::NotFound(id))
    }

    /// All requests for one principal, oldest first
    pub async fn list_for_user(
        &self,
        principal: &str,
    ) -> Result<Vec<WithdrawalRequest>, WorkflowError> {
        Ok(self.store.get_for_user(principal).await?)
    }

    /// All requests in one status
    pub async fn list_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>, WorkflowError> {
        Ok(self.store.get_by_status(status).await?)
    }

    /// All requests
    pub async fn list_all(&self) -> Result<Vec<WithdrawalRequest>, WorkflowError> {
        Ok(self.store.get_all().await?)
    }

    /// Drop every stored request. Used by the platform reset; callers
    /// clear the ledger's reservations alongside.
    pub async fn clear_all(&self) -> Result<(), WorkflowError> {
        self.store.clear().await?;
        Ok(())
    }

    /// Aggregate workflow statistics
    pub async fn stats(&self) -> Result<WithdrawalStats, WorkflowError> {
        let mut stats = WithdrawalStats::default();

        for request in self.store.get_all().await? {
            stats.total_requests += 1;
            stats.total_sats_requested += request.amount_sats();

            match request.status() {
                WithdrawalStatus::Pending => stats.pending += 1,
                WithdrawalStatus::Approved => stats.approved += 1,
                WithdrawalStatus::Rejected => stats.rejected += 1,
                WithdrawalStatus::Processed => {
                    stats.processed += 1;
                    stats.total_sats_processed += request.amount_sats();
                }
            }
        }

        Ok(stats)
    }

    fn validate_address(&self, address: &str) -> Result<(), WorkflowError> {
        let parsed = Address::from_str(address)
            .map_err(|e| WorkflowError::InvalidAddress(format!("{}: {}", address, e)))?;

        parsed.require_network(self.network).map_err(|_| {
            WorkflowError::InvalidAddress(format!(
                "{} is not valid for network {}",
                address, self.network
            ))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AccountStore, MemoryAccountStore, MemoryWithdrawalStore};
    use crate::types::account::UserAccount;

    // BIP-173 test vector, a valid testnet P2WPKH address
    const DEST: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
    const MAINNET_DEST: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    async fn setup(balance_sats: u64) -> (Arc<BalanceLedger>, WithdrawalWorkflow) {
        let accounts = Arc::new(MemoryAccountStore::new());
        accounts.insert(&UserAccount::new("alice")).await.unwrap();

        let ledger = Arc::new(BalanceLedger::new(accounts));
        if balance_sats > 0 {
            ledger
                .credit_deposit("alice", balance_sats, "seed:0")
                .await
                .unwrap();
        }

        let workflow = WithdrawalWorkflow::new(
            Arc::new(MemoryWithdrawalStore::new()),
            ledger.clone(),
            Network::Testnet,
        )
        .await
        .unwrap();

        (ledger, workflow)
    }

    #[tokio::test]
    async fn test_request_reserves_funds() {
        let (ledger, workflow) = setup(1_000_000).await;

        let request = workflow.request("alice", 300_000, DEST).await.unwrap();
        assert_eq!(request.id(), 1);
        assert_eq!(request.status(), WithdrawalStatus::Pending);
        assert_eq!(request.amount_sats(), 300_000);

        let snapshot = ledger.balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 1_000_000);
        assert_eq!(snapshot.reserved_sats, 300_000);
        assert_eq!(snapshot.spendable_sats, 700_000);
    }

    #[tokio::test]
    async fn test_request_zero_amount() {
        let (ledger, workflow) = setup(1_000_000).await;

        let result = workflow.request("alice", 0, DEST).await;
        assert!(matches!(result, Err(WorkflowError::InvalidAmount(_))));
        assert_eq!(ledger.reserved_for("alice").await, 0);
    }

    #[tokio::test]
    async fn test_request_invalid_address() {
        let (ledger, workflow) = setup(1_000_000).await;

        let result = workflow.request("alice", 10_000, "not-an-address").await;
        assert!(matches!(result, Err(WorkflowError::InvalidAddress(_))));

        // Right encoding, wrong network
        let result = workflow.request("alice", 10_000, MAINNET_DEST).await;
        assert!(matches!(result, Err(WorkflowError::InvalidAddress(_))));

        assert_eq!(ledger.reserved_for("alice").await, 0);
    }

    #[tokio::test]
    async fn test_request_insufficient_funds_unmasked() {
        let (_ledger, workflow) = setup(1_000_000).await;

        let result = workflow.request("alice", 2_000_000, DEST).await;
        match result {
            Err(WorkflowError::Ledger(LedgerError::InsufficientBalance {
                requested_sats,
                available_sats,
            })) => {
                assert_eq!(requested_sats, 2_000_000);
                assert_eq!(available_sats, 1_000_000);
            }
            other => panic!("expected InsufficientBalance, got {:?}", other),
        }

        let err = workflow.request("alice", 2_000_000, DEST).await.unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");
    }

    #[tokio::test]
    async fn test_full_balance_request_blocks_second() {
        // 0.01 BTC balance: the first full-balance request wins
        let (_ledger, workflow) = setup(1_000_000).await;

        workflow.request("alice", 1_000_000, DEST).await.unwrap();

        let result = workflow.request("alice", 1_000_000, DEST).await;
        assert!(matches!(
            result,
            Err(WorkflowError::Ledger(LedgerError::InsufficientBalance {
                available_sats: 0,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_approve_does_not_touch_ledger() {
        let (ledger, workflow) = setup(1_000_000).await;

        let request = workflow.request("alice", 300_000, DEST).await.unwrap();
        let approved = workflow.approve(request.id()).await.unwrap();
        assert_eq!(approved.status(), WithdrawalStatus::Approved);

        let snapshot = ledger.balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 1_000_000);
        assert_eq!(snapshot.reserved_sats, 300_000);
        assert_eq!(snapshot.spendable_sats, 700_000);
    }

    #[tokio::test]
    async fn test_approve_requires_pending() {
        let (_ledger, workflow) = setup(1_000_000).await;

        let request = workflow.request("alice", 100_000, DEST).await.unwrap();
        workflow.approve(request.id()).await.unwrap();

        let result = workflow.approve(request.id()).await;
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidTransition {
                from: WithdrawalStatus::Approved,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_reject_releases_reservation() {
        let (ledger, workflow) = setup(1_000_000).await;

        let request = workflow.request("alice", 400_000, DEST).await.unwrap();
        let rejected = workflow
            .reject(request.id(), Some("manual review failed".to_string()))
            .await
            .unwrap();

        assert_eq!(rejected.status(), WithdrawalStatus::Rejected);
        assert_eq!(rejected.rejection_reason(), Some("manual review failed"));

        let snapshot = ledger.balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 1_000_000);
        assert_eq!(snapshot.spendable_sats, 1_000_000);
    }

    #[tokio::test]
    async fn test_reject_after_approve_restores_balance() {
        let (ledger, workflow) = setup(1_000_000).await;

        let request = workflow.request("alice", 400_000, DEST).await.unwrap();
        workflow.approve(request.id()).await.unwrap();
        workflow.reject(request.id(), None).await.unwrap();

        let snapshot = ledger.balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 1_000_000);
        assert_eq!(snapshot.reserved_sats, 0);
        assert_eq!(snapshot.spendable_sats, 1_000_000);
    }

    #[tokio::test]
    async fn test_process_commits_reservation() {
        let (ledger, workflow) = setup(1_000_000).await;

        let request = workflow.request("alice", 300_000, DEST).await.unwrap();
        workflow.approve(request.id()).await.unwrap();
        let processed = workflow
            .mark_processed(request.id(), "ab".repeat(32).as_str())
            .await
            .unwrap();

        assert_eq!(processed.status(), WithdrawalStatus::Processed);
        assert_eq!(processed.tx_hash(), Some("ab".repeat(32).as_str()));

        let snapshot = ledger.balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 700_000);
        assert_eq!(snapshot.reserved_sats, 0);
        assert_eq!(snapshot.total_withdrawals_sats, 300_000);
    }

    #[tokio::test]
    async fn test_process_requires_approved() {
        let (ledger, workflow) = setup(1_000_000).await;

        let request = workflow.request("alice", 300_000, DEST).await.unwrap();

        // Straight from pending
        let result = workflow.mark_processed(request.id(), "beef").await;
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidTransition {
                from: WithdrawalStatus::Pending,
                ..
            })
        ));

        // After rejection the request is terminal
        workflow.reject(request.id(), None).await.unwrap();
        let result = workflow.mark_processed(request.id(), "beef").await;
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidTransition {
                from: WithdrawalStatus::Rejected,
                ..
            })
        ));

        // Refused transitions never move funds
        let snapshot = ledger.balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 1_000_000);
        assert_eq!(snapshot.spendable_sats, 1_000_000);
    }

    #[tokio::test]
    async fn test_reject_after_processed_is_invalid() {
        let (_ledger, workflow) = setup(1_000_000).await;

        let request = workflow.request("alice", 100_000, DEST).await.unwrap();
        workflow.approve(request.id()).await.unwrap();
        workflow.mark_processed(request.id(), "beef").await.unwrap();

        let result = workflow.reject(request.id(), None).await;
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidTransition {
                from: WithdrawalStatus::Processed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let (_ledger, workflow) = setup(1_000_000).await;

        let result = workflow.approve(99).await;
        assert!(matches!(result, Err(WorkflowError::NotFound(99))));
        assert_eq!(
            workflow.get(99).await.unwrap_err().error_code(),
            "WITHDRAWAL_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_ids_continue_after_restart() {
        let accounts = Arc::new(MemoryAccountStore::new());
        accounts.insert(&UserAccount::new("alice")).await.unwrap();
        let ledger = Arc::new(BalanceLedger::new(accounts));
        ledger
            .credit_deposit("alice", 1_000_000, "seed:0")
            .await
            .unwrap();

        // A store carried over from a previous run
        let store = Arc::new(MemoryWithdrawalStore::new());
        store
            .insert(&WithdrawalRequest::from_parts(
                7,
                "alice".to_string(),
                250_000,
                DEST.to_string(),
                WithdrawalStatus::Approved,
                3,
                1_700_000_000,
                1_700_000_000,
                None,
                None,
                None,
            ))
            .await
            .unwrap();

        let workflow = WithdrawalWorkflow::new(store, ledger.clone(), Network::Testnet)
            .await
            .unwrap();
        let recovered = workflow.rehydrate().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(ledger.reserved_for("alice").await, 250_000);

        // New IDs continue past the stored maximum
        let request = workflow.request("alice", 100_000, DEST).await.unwrap();
        assert_eq!(request.id(), 8);

        // The recovered reservation is still committable
        workflow
            .mark_processed(7, "ab".repeat(32).as_str())
            .await
            .unwrap();
        let snapshot = ledger.balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 750_000);
        assert_eq!(snapshot.reserved_sats, 100_000);
    }

    #[tokio::test]
    async fn test_stats() {
        let (_ledger, workflow) = setup(1_000_000).await;

        let a = workflow.request("alice", 100_000, DEST).await.unwrap();
        let b = workflow.request("alice", 200_000, DEST).await.unwrap();
        workflow.request("alice", 300_000, DEST).await.unwrap();

        workflow.approve(a.id()).await.unwrap();
        workflow.mark_processed(a.id(), "beef").await.unwrap();
        workflow.reject(b.id(), None).await.unwrap();

        let stats = workflow.stats().await.unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.approved, 0);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.total_sats_requested, 600_000);
        assert_eq!(stats.total_sats_processed, 100_000);
        assert!(stats.to_string().contains("3 total"));
    }
}
