//! Platform Service
//!
//! The direct-call embodiment of the custody contract. One service owns
//! the derivation engine, the balance ledger, the withdrawal workflow,
//! the trade validator, and the audit log; the HTTP layer is a thin
//! adapter over it.
//!
//! Construction rehydrates runtime state from storage: persisted wallet
//! assignments are re-derived and verified against the configured master
//! seed, and ledger reservations are re-opened from non-terminal
//! withdrawal requests.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::audit::{AdminAction, AuditLog};
use crate::config::PlatformConfig;
use crate::error::{PlatformError, Result};
use crate::ledger::{BalanceLedger, BalanceSnapshot, CreditOutcome};
use crate::storage::{AccountStore, AuditStore, WithdrawalStore};
use crate::types::account::UserAccount;
use crate::types::units::{sats_to_btc, sats_to_display};
use crate::validator::{BalanceStatusReport, BalanceValidator, TradeCost};
use crate::wallet::KeyDerivationEngine;
use crate::withdrawal::{WithdrawalRequest, WithdrawalStats, WithdrawalStatus, WithdrawalWorkflow};

/// One repaired account in a reconciliation run
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileEntry {
    pub principal: String,
    /// Balance the account record carried
    pub recorded_sats: u64,
    /// Balance implied by the deposit/withdrawal totals
    pub expected_sats: u64,
}

/// Outcome of `admin_reconcile_balances`
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub accounts_checked: usize,
    pub repaired: Vec<ReconcileEntry>,
}

/// Aggregate platform view for operators
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub accounts: usize,
    pub wallets_assigned: usize,
    pub total_balance_sats: u64,
    pub total_deposits_sats: u64,
    pub total_withdrawals_sats: u64,
    pub open_reservations: usize,
    pub withdrawals: WithdrawalStats,
}

/// The custody platform service
pub struct PlatformService {
    engine: KeyDerivationEngine,
    ledger: Arc<BalanceLedger>,
    workflow: WithdrawalWorkflow,
    validator: BalanceValidator,
    accounts: Arc<dyn AccountStore>,
    audit: AuditLog,
    test_account_prefix: String,
}

impl PlatformService {
    /// Build the service over the given stores and rehydrate runtime
    /// state from them.
    ///
    /// Fails with `SeedMismatch` if any persisted wallet assignment does
    /// not re-derive to its recorded address under the configured master
    /// seed: serving with the wrong seed would mint addresses the
    /// platform cannot spend from.
    pub async fn new(
        config: &PlatformConfig,
        accounts: Arc<dyn AccountStore>,
        withdrawals: Arc<dyn WithdrawalStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Result<Self> {
        let engine = KeyDerivationEngine::new(&config.master_seed, config.network)?;
        let network = config.network.bitcoin_network();

        let ledger = Arc::new(BalanceLedger::new(accounts.clone()));
        let workflow = WithdrawalWorkflow::new(withdrawals, ledger.clone(), network).await?;

        let service = Self {
            engine,
            ledger,
            workflow,
            validator: BalanceValidator::new(config.trade_limits),
            accounts,
            audit: AuditLog::new(audit_store),
            test_account_prefix: config.test_account_prefix.clone(),
        };
        service.rehydrate().await?;

        Ok(service)
    }

    /// Rebuild engine assignments and ledger reservations from storage
    async fn rehydrate(&self) -> Result<()> {
        let mut restored = 0;
        for account in self.accounts.get_all().await? {
            if let (Some(address), Some(index)) =
                (account.deposit_address.as_deref(), account.derivation_index)
            {
                self.engine
                    .restore_assignment(&account.principal, index, address)
                    .await?;
                restored += 1;
            }
        }

        let reservations = self.workflow.rehydrate().await?;

        tracing::info!(
            target: "btcopts::service",
            wallets_restored = restored,
            reservations_recovered = reservations,
            "platform state rehydrated"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accounts and wallets
    // ------------------------------------------------------------------

    /// Idempotent account bootstrap: returns the existing account or
    /// creates an empty one.
    pub async fn create_user(&self, principal: &str) -> Result<UserAccount> {
        if principal.trim().is_empty() {
            return Err(PlatformError::internal("principal must not be empty"));
        }

        if let Some(existing) = self.accounts.get(principal).await? {
            return Ok(existing);
        }

        let account = UserAccount::new(principal);
        match self.accounts.insert(&account).await {
            Ok(()) => Ok(account),
            // Lost a creation race: the other caller's account wins
            Err(crate::storage::StorageError::Duplicate(_)) => self
                .accounts
                .get(principal)
                .await?
                .ok_or_else(|| PlatformError::UnknownAccount(principal.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Derive (or return) the principal's deposit address, creating the
    /// account if absent. Safe to retry: a repeat call never mints a new
    /// address.
    pub async fn generate_user_wallet(&self, principal: &str) -> Result<String> {
        let mut account = self.create_user(principal).await?;

        if let Some(address) = account.deposit_address.clone() {
            return Ok(address);
        }

        let wallet = self.engine.derive_for_user(principal).await?;
        if account.assign_wallet(wallet.address.clone(), wallet.index) {
            self.accounts.update(&account).await?;
        }

        Ok(wallet.address)
    }

    /// Read an account
    pub async fn get_user(&self, principal: &str) -> Result<Option<UserAccount>> {
        Ok(self.accounts.get(principal).await?)
    }

    /// Read a principal's deposit address, if one has been derived
    pub async fn get_user_wallet(&self, principal: &str) -> Result<Option<String>> {
        Ok(self
            .accounts
            .get(principal)
            .await?
            .and_then(|a| a.deposit_address))
    }

    /// Look up the account a deposit address belongs to
    pub async fn get_user_by_address(&self, address: &str) -> Result<Option<UserAccount>> {
        Ok(self.accounts.get_by_address(address).await?)
    }

    // ------------------------------------------------------------------
    // Balances and deposits
    // ------------------------------------------------------------------

    /// Credit a confirmed deposit reported by the external detector.
    ///
    /// Idempotent per `deposit_ref`: a replayed report credits nothing.
    pub async fn deposit_bitcoin(
        &self,
        principal: &str,
        amount_sats: u64,
        deposit_ref: &str,
    ) -> Result<CreditOutcome> {
        if deposit_ref.trim().is_empty() {
            return Err(crate::ledger::LedgerError::InvalidReference(
                "deposit reference must not be empty".to_string(),
            )
            .into());
        }
        Ok(self
            .ledger
            .credit_deposit(principal, amount_sats, deposit_ref)
            .await?)
    }

    /// Balance view: committed, reserved, and spendable figures
    pub async fn get_balance(&self, principal: &str) -> Result<BalanceSnapshot> {
        Ok(self.ledger.balance(principal).await?)
    }

    /// Advisory balance classification at a price quote. Never blocks a
    /// trade; blocking is `validate_trade`'s job.
    ///
    /// Callers with a concrete funding requirement pass it as
    /// `required_balance_btc`; without one the platform's minimum balance
    /// floor is used.
    pub async fn balance_status(
        &self,
        principal: &str,
        required_balance_btc: Option<Decimal>,
        btc_price_usd: Decimal,
    ) -> Result<BalanceStatusReport> {
        let snapshot = self.ledger.balance(principal).await?;
        let balance_btc = sats_to_btc(snapshot.spendable_sats);
        let required =
            required_balance_btc.unwrap_or(self.validator.limits().minimum_balance_btc);
        Ok(self
            .validator
            .balance_status(balance_btc, required, btc_price_usd)?)
    }

    /// Decide whether the principal's spendable balance supports a
    /// proposed trade. Pure check: commits nothing.
    pub async fn validate_trade(
        &self,
        principal: &str,
        contract_count: u32,
        btc_price_usd: Decimal,
    ) -> Result<TradeCost> {
        let snapshot = self.ledger.balance(principal).await?;
        let balance_btc = sats_to_btc(snapshot.spendable_sats);
        Ok(self
            .validator
            .validate(balance_btc, contract_count, btc_price_usd)?)
    }

    /// The configured validator (for limit introspection)
    pub fn validator(&self) -> &BalanceValidator {
        &self.validator
    }

    // ------------------------------------------------------------------
    // Withdrawals
    // ------------------------------------------------------------------

    /// Submit a user withdrawal request, reserving the funds
    pub async fn request_withdrawal(
        &self,
        principal: &str,
        amount_sats: u64,
        to_address: &str,
    ) -> Result<WithdrawalRequest> {
        Ok(self
            .workflow
            .request(principal, amount_sats, to_address)
            .await?)
    }

    /// Platform-initiated convenience path: request and approve in one
    /// step. The broadcast result still arrives through
    /// `admin_mark_withdrawal_processed` or `admin_reject_withdrawal`.
    pub async fn withdraw_bitcoin(
        &self,
        principal: &str,
        amount_sats: u64,
        to_address: &str,
    ) -> Result<WithdrawalRequest> {
        let request = self
            .workflow
            .request(principal, amount_sats, to_address)
            .await?;
        Ok(self.workflow.approve(request.id()).await?)
    }

    /// Read one withdrawal request
    pub async fn get_withdrawal(&self, id: u64) -> Result<WithdrawalRequest> {
        Ok(self.workflow.get(id).await?)
    }

    /// All withdrawal requests for a principal, oldest first
    pub async fn list_withdrawals_for(&self, principal: &str) -> Result<Vec<WithdrawalRequest>> {
        Ok(self.workflow.list_for_user(principal).await?)
    }

    /// All requests awaiting review
    pub async fn list_pending_withdrawals(&self) -> Result<Vec<WithdrawalRequest>> {
        Ok(self
            .workflow
            .list_by_status(WithdrawalStatus::Pending)
            .await?)
    }

    // ------------------------------------------------------------------
    // Administrative operations
    //
    // Every entry point below records an audit entry with the acting
    // operator's name before returning. Authorization is a pluggable
    // external check; none is enforced here.
    // ------------------------------------------------------------------

    /// Approve a pending withdrawal
    pub async fn admin_approve_withdrawal(
        &self,
        actor: &str,
        id: u64,
    ) -> Result<WithdrawalRequest> {
        let request = self.workflow.approve(id).await?;
        self.audit
            .record(
                actor,
                "approve_withdrawal",
                serde_json::json!({
                    "request_id": id,
                    "principal": request.principal(),
                    "amount_sats": request.amount_sats(),
                }),
            )
            .await?;
        Ok(request)
    }

    /// Reject a pending or approved withdrawal, releasing its funds
    pub async fn admin_reject_withdrawal(
        &self,
        actor: &str,
        id: u64,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest> {
        let request = self.workflow.reject(id, reason.clone()).await?;
        self.audit
            .record(
                actor,
                "reject_withdrawal",
                serde_json::json!({
                    "request_id": id,
                    "principal": request.principal(),
                    "amount_sats": request.amount_sats(),
                    "reason": reason,
                }),
            )
            .await?;
        Ok(request)
    }

    /// Record a successful broadcast, debiting the ledger
    pub async fn admin_mark_withdrawal_processed(
        &self,
        actor: &str,
        id: u64,
        tx_hash: &str,
    ) -> Result<WithdrawalRequest> {
        let request = self.workflow.mark_processed(id, tx_hash).await?;
        self.audit
            .record(
                actor,
                "mark_withdrawal_processed",
                serde_json::json!({
                    "request_id": id,
                    "principal": request.principal(),
                    "amount_sats": request.amount_sats(),
                    "tx_hash": tx_hash,
                }),
            )
            .await?;
        Ok(request)
    }

    /// Export a principal's private key in WIF. Debug-only path; the key
    /// itself is never written to the audit trail or the logs.
    pub async fn admin_export_private_key(&self, actor: &str, principal: &str) -> Result<String> {
        let wif = self.engine.export_private_key(principal).await?;
        self.audit
            .record(
                actor,
                "export_private_key",
                serde_json::json!({ "principal": principal }),
            )
            .await?;
        Ok(wif)
    }

    /// Corrective credit outside the deposit-detection path.
    ///
    /// Synthesizes a unique deposit reference so each corrective credit
    /// is a distinct ledger event.
    pub async fn admin_credit_user_balance(
        &self,
        actor: &str,
        principal: &str,
        amount_sats: u64,
    ) -> Result<CreditOutcome> {
        let deposit_ref = format!("admin:{}", uuid::Uuid::new_v4());
        let outcome = self
            .ledger
            .credit_deposit(principal, amount_sats, &deposit_ref)
            .await?;
        self.audit
            .record(
                actor,
                "credit_balance",
                serde_json::json!({
                    "principal": principal,
                    "amount_sats": amount_sats,
                    "deposit_ref": deposit_ref,
                }),
            )
            .await?;
        Ok(outcome)
    }

    /// Recompute each account's committed balance from its totals and
    /// repair any drift, reporting what was fixed.
    pub async fn admin_reconcile_balances(&self, actor: &str) -> Result<ReconcileReport> {
        let accounts = self.accounts.get_all().await?;
        let accounts_checked = accounts.len();
        let mut repaired = Vec::new();

        for mut account in accounts {
            let expected = account
                .total_deposits_sats
                .saturating_sub(account.total_withdrawals_sats);
            if account.balance_sats != expected {
                tracing::warn!(
                    target: "btcopts::service",
                    principal = %account.principal,
                    recorded_sats = account.balance_sats,
                    expected_sats = expected,
                    "balance drift repaired"
                );
                repaired.push(ReconcileEntry {
                    principal: account.principal.clone(),
                    recorded_sats: account.balance_sats,
                    expected_sats: expected,
                });
                account.balance_sats = expected;
                self.accounts.update(&account).await?;
            }
        }

        self.audit
            .record(
                actor,
                "reconcile_balances",
                serde_json::json!({
                    "accounts_checked": accounts_checked,
                    "repaired": repaired.len(),
                }),
            )
            .await?;

        Ok(ReconcileReport {
            accounts_checked,
            repaired,
        })
    }

    /// Delete accounts whose principal carries the test prefix and that
    /// hold no open reservations. Returns the removed principals.
    pub async fn admin_clean_test_accounts(&self, actor: &str) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        for account in self.accounts.get_all().await? {
            if !account.principal.starts_with(&self.test_account_prefix) {
                continue;
            }
            if self.ledger.has_open_reservations(&account.principal).await {
                tracing::warn!(
                    target: "btcopts::service",
                    principal = %account.principal,
                    "test account skipped: open reservations"
                );
                continue;
            }

            self.accounts
                .delete_deposit_events_for(&account.principal)
                .await?;
            if self.accounts.delete(&account.principal).await? {
                removed.push(account.principal);
            }
        }

        self.audit
            .record(
                actor,
                "clean_test_accounts",
                serde_json::json!({
                    "prefix": self.test_account_prefix,
                    "removed": removed,
                }),
            )
            .await?;

        Ok(removed)
    }

    /// Wipe accounts, deposit events, withdrawals, reservations, and
    /// wallet assignments. The audit trail is retained: the reset itself
    /// must remain auditable.
    pub async fn admin_reset_platform_data(&self, actor: &str) -> Result<()> {
        let account_count = self.accounts.count().await?;

        self.ledger.clear_reservations().await;
        self.workflow.clear_all().await?;
        self.accounts.clear().await?;
        self.engine.reset_assignments().await;

        self.audit
            .record(
                actor,
                "reset_platform_data",
                serde_json::json!({ "accounts_wiped": account_count }),
            )
            .await?;

        tracing::warn!(
            target: "btcopts::service",
            accounts_wiped = account_count,
            "platform data reset"
        );
        Ok(())
    }

    /// The full admin-action record, oldest first
    pub async fn audit_entries(&self) -> Result<Vec<AdminAction>> {
        Ok(self.audit.entries().await?)
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    /// Aggregate platform statistics
    pub async fn stats(&self) -> Result<PlatformStats> {
        let accounts = self.accounts.get_all().await?;
        let wallets_assigned = accounts
            .iter()
            .filter(|a| a.deposit_address.is_some())
            .count();
        let total_balance_sats = accounts.iter().map(|a| a.balance_sats).sum();
        let total_deposits_sats = accounts.iter().map(|a| a.total_deposits_sats).sum();
        let total_withdrawals_sats = accounts.iter().map(|a| a.total_withdrawals_sats).sum();

        Ok(PlatformStats {
            accounts: accounts.len(),
            wallets_assigned,
            total_balance_sats,
            total_deposits_sats,
            total_withdrawals_sats,
            open_reservations: self.ledger.open_reservations().await.len(),
            withdrawals: self.workflow.stats().await?,
        })
    }

    /// One-line summary for the console
    pub async fn print_summary(&self) -> Result<()> {
        let stats = self.stats().await?;
        println!(
            "Accounts: {} ({} with wallets) | Held: {} | {}",
            stats.accounts,
            stats.wallets_assigned,
            sats_to_display(stats.total_balance_sats),
            stats.withdrawals
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::storage::{MemoryAccountStore, MemoryAuditStore, MemoryWithdrawalStore};
    use crate::validator::TradeLimits;
    use crate::wallet::{MasterSeed, WalletError};
    use rust_decimal_macros::dec;

    const TEST_SEED_HEX: &str =
        "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const DEST: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    fn test_config() -> PlatformConfig {
        PlatformConfig {
            network: Network::Testnet,
            master_seed: MasterSeed::from_hex(TEST_SEED_HEX).unwrap(),
            db_path: "memory".to_string(),
            api_port: 3001,
            log_level: "info".to_string(),
            log_json: false,
            trade_limits: TradeLimits::default(),
            test_account_prefix: "test-".to_string(),
        }
    }

    async fn service() -> PlatformService {
        PlatformService::new(
            &test_config(),
            Arc::new(MemoryAccountStore::new()),
            Arc::new(MemoryWithdrawalStore::new()),
            Arc::new(MemoryAuditStore::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_user_is_idempotent() {
        let svc = service().await;

        let first = svc.create_user("alice").await.unwrap();
        let second = svc.create_user("alice").await.unwrap();
        assert_eq!(first.principal, second.principal);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_wallet_generation_is_idempotent() {
        let svc = service().await;

        let first = svc.generate_user_wallet("alice").await.unwrap();
        let second = svc.generate_user_wallet("alice").await.unwrap();
        assert_eq!(first, second);

        let account = svc.get_user("alice").await.unwrap().unwrap();
        assert_eq!(account.deposit_address.as_deref(), Some(first.as_str()));
        assert_eq!(account.derivation_index, Some(0));

        assert_eq!(svc.get_user_wallet("alice").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_wallets_unique_per_principal() {
        let svc = service().await;

        let alice = svc.generate_user_wallet("alice").await.unwrap();
        let bob = svc.generate_user_wallet("bob").await.unwrap();
        assert_ne!(alice, bob);

        let by_address = svc.get_user_by_address(&alice).await.unwrap().unwrap();
        assert_eq!(by_address.principal, "alice");
    }

    #[tokio::test]
    async fn test_deposit_and_balance() {
        let svc = service().await;
        svc.create_user("alice").await.unwrap();

        let outcome = svc.deposit_bitcoin("alice", 100_000, "tx:0").await.unwrap();
        assert_eq!(outcome, CreditOutcome::Credited);

        // Replay credits nothing
        let replay = svc.deposit_bitcoin("alice", 100_000, "tx:0").await.unwrap();
        assert_eq!(replay, CreditOutcome::AlreadyCredited);

        let snapshot = svc.get_balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 100_000);
    }

    #[tokio::test]
    async fn test_deposit_requires_reference() {
        let svc = service().await;
        svc.create_user("alice").await.unwrap();

        let result = svc.deposit_bitcoin("alice", 100_000, "  ").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_trade_validation_uses_spendable_balance() {
        let svc = service().await;
        svc.create_user("alice").await.unwrap();
        // 1 BTC
        svc.deposit_bitcoin("alice", 100_000_000, "tx:0")
            .await
            .unwrap();

        let cost = svc
            .validate_trade("alice", 5, dec!(50000))
            .await
            .unwrap();
        assert_eq!(cost.usd_cost, dec!(5));
        assert_eq!(cost.btc_cost, dec!(0.0001));

        // Reserve nearly everything; the remainder cannot cover the trade
        svc.request_withdrawal("alice", 99_999_000, DEST)
            .await
            .unwrap();
        let result = svc.validate_trade("alice", 1000, dec!(50000)).await;
        assert!(matches!(
            result,
            Err(PlatformError::Validation(
                crate::validator::TradeValidationError::InsufficientBalance { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_balance_status_is_advisory() {
        let svc = service().await;
        svc.create_user("alice").await.unwrap();
        svc.deposit_bitcoin("alice", 10_000, "tx:0").await.unwrap();

        // 0.0001 BTC at $50k = $5: critical but tradeable
        let report = svc.balance_status("alice", None, dec!(50000)).await.unwrap();
        assert_eq!(
            report.standing,
            crate::validator::BalanceStanding::Critical
        );
        assert!(report.can_trade);

        // Against a concrete requirement the same balance falls short
        let report = svc
            .balance_status("alice", Some(dec!(0.0004)), dec!(50000))
            .await
            .unwrap();
        assert_eq!(
            report.standing,
            crate::validator::BalanceStanding::Insufficient
        );
        assert!(!report.can_trade);
    }

    #[tokio::test]
    async fn test_withdrawal_lifecycle_with_audit() {
        let svc = service().await;
        svc.create_user("alice").await.unwrap();
        svc.deposit_bitcoin("alice", 1_000_000, "tx:0").await.unwrap();

        let request = svc.request_withdrawal("alice", 400_000, DEST).await.unwrap();
        svc.admin_approve_withdrawal("ops", request.id())
            .await
            .unwrap();
        svc.admin_mark_withdrawal_processed("ops", request.id(), "beef")
            .await
            .unwrap();

        let snapshot = svc.get_balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 600_000);
        assert_eq!(snapshot.total_withdrawals_sats, 400_000);

        let actions: Vec<String> = svc
            .audit_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(
            actions,
            vec!["approve_withdrawal", "mark_withdrawal_processed"]
        );
    }

    #[tokio::test]
    async fn test_withdraw_bitcoin_combines_request_and_approve() {
        let svc = service().await;
        svc.create_user("alice").await.unwrap();
        svc.deposit_bitcoin("alice", 1_000_000, "tx:0").await.unwrap();

        let request = svc.withdraw_bitcoin("alice", 250_000, DEST).await.unwrap();
        assert_eq!(request.status(), WithdrawalStatus::Approved);

        // Broadcast failure path still releases the funds
        svc.admin_reject_withdrawal("ops", request.id(), Some("broadcast failed".to_string()))
            .await
            .unwrap();
        let snapshot = svc.get_balance("alice").await.unwrap();
        assert_eq!(snapshot.spendable_sats, 1_000_000);
    }

    #[tokio::test]
    async fn test_admin_credit_synthesizes_distinct_refs() {
        let svc = service().await;
        svc.create_user("alice").await.unwrap();

        svc.admin_credit_user_balance("ops", "alice", 5_000)
            .await
            .unwrap();
        svc.admin_credit_user_balance("ops", "alice", 5_000)
            .await
            .unwrap();

        // Two corrective credits of the same amount both land
        let snapshot = svc.get_balance("alice").await.unwrap();
        assert_eq!(snapshot.balance_sats, 10_000);
    }

    #[tokio::test]
    async fn test_export_private_key_round_trips() {
        let svc = service().await;
        let address = svc.generate_user_wallet("alice").await.unwrap();

        let wif = svc.admin_export_private_key("ops", "alice").await.unwrap();
        let key = bitcoin::PrivateKey::from_wif(&wif).unwrap();
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let pubkey = bitcoin::CompressedPublicKey::from_private_key(&secp, &key).unwrap();
        let derived = bitcoin::Address::p2wpkh(&pubkey, bitcoin::Network::Testnet);
        assert_eq!(derived.to_string(), address);

        // No wallet yet: export refuses
        let err = svc.admin_export_private_key("ops", "bob").await.unwrap_err();
        assert!(matches!(err, PlatformError::Wallet(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reconcile_repairs_drift() {
        let accounts = Arc::new(MemoryAccountStore::new());
        let svc = PlatformService::new(
            &test_config(),
            accounts.clone(),
            Arc::new(MemoryWithdrawalStore::new()),
            Arc::new(MemoryAuditStore::new()),
        )
        .await
        .unwrap();

        svc.create_user("alice").await.unwrap();
        svc.deposit_bitcoin("alice", 100_000, "tx:0").await.unwrap();

        // Corrupt the committed balance behind the service's back
        let mut account = accounts.get("alice").await.unwrap().unwrap();
        account.balance_sats = 42;
        accounts.update(&account).await.unwrap();

        let report = svc.admin_reconcile_balances("ops").await.unwrap();
        assert_eq!(report.accounts_checked, 1);
        assert_eq!(report.repaired.len(), 1);
        assert_eq!(report.repaired[0].recorded_sats, 42);
        assert_eq!(report.repaired[0].expected_sats, 100_000);

        assert_eq!(svc.get_balance("alice").await.unwrap().balance_sats, 100_000);

        // A clean second run repairs nothing
        let report = svc.admin_reconcile_balances("ops").await.unwrap();
        assert!(report.repaired.is_empty());
    }

    #[tokio::test]
    async fn test_clean_test_accounts_respects_reservations() {
        let svc = service().await;
        svc.create_user("test-alice").await.unwrap();
        svc.create_user("test-bob").await.unwrap();
        svc.create_user("carol").await.unwrap();

        svc.deposit_bitcoin("test-bob", 1_000_000, "tx:0")
            .await
            .unwrap();
        svc.request_withdrawal("test-bob", 500_000, DEST)
            .await
            .unwrap();

        let removed = svc.admin_clean_test_accounts("ops").await.unwrap();
        assert_eq!(removed, vec!["test-alice".to_string()]);

        // test-bob survives (open reservation), carol is not a test account
        assert!(svc.get_user("test-bob").await.unwrap().is_some());
        assert!(svc.get_user("carol").await.unwrap().is_some());
        assert!(svc.get_user("test-alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_retains_audit_trail() {
        let svc = service().await;
        svc.generate_user_wallet("alice").await.unwrap();
        svc.deposit_bitcoin("alice", 1_000_000, "tx:0").await.unwrap();
        svc.request_withdrawal("alice", 100_000, DEST).await.unwrap();

        svc.admin_reset_platform_data("ops").await.unwrap();

        assert!(svc.get_user("alice").await.unwrap().is_none());
        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.accounts, 0);
        assert_eq!(stats.open_reservations, 0);
        assert_eq!(stats.withdrawals.total_requests, 0);

        // The reset itself is on the record
        let entries = svc.audit_entries().await.unwrap();
        assert_eq!(entries.last().unwrap().action, "reset_platform_data");

        // Index allocation starts over after the wipe
        svc.generate_user_wallet("dave").await.unwrap();
        let account = svc.get_user("dave").await.unwrap().unwrap();
        assert_eq!(account.derivation_index, Some(0));
    }

    #[tokio::test]
    async fn test_rehydration_restores_wallets_and_reservations() {
        let accounts = Arc::new(MemoryAccountStore::new());
        let withdrawals = Arc::new(MemoryWithdrawalStore::new());
        let audit = Arc::new(MemoryAuditStore::new());

        let address = {
            let svc = PlatformService::new(
                &test_config(),
                accounts.clone(),
                withdrawals.clone(),
                audit.clone(),
            )
            .await
            .unwrap();

            let address = svc.generate_user_wallet("alice").await.unwrap();
            svc.deposit_bitcoin("alice", 1_000_000, "tx:0").await.unwrap();
            svc.request_withdrawal("alice", 400_000, DEST).await.unwrap();
            address
        };

        // Same stores, fresh process
        let svc = PlatformService::new(&test_config(), accounts, withdrawals, audit)
            .await
            .unwrap();

        // The wallet survives without re-derivation
        assert_eq!(
            svc.generate_user_wallet("alice").await.unwrap(),
            address
        );

        // The in-flight withdrawal still holds its funds
        let snapshot = svc.get_balance("alice").await.unwrap();
        assert_eq!(snapshot.reserved_sats, 400_000);
        assert_eq!(snapshot.spendable_sats, 600_000);

        // New principals do not collide with the restored index
        let bob = svc.generate_user_wallet("bob").await.unwrap();
        assert_ne!(bob, address);
    }

    #[tokio::test]
    async fn test_rehydration_rejects_wrong_seed() {
        let accounts = Arc::new(MemoryAccountStore::new());
        let withdrawals = Arc::new(MemoryWithdrawalStore::new());
        let audit = Arc::new(MemoryAuditStore::new());

        {
            let svc = PlatformService::new(
                &test_config(),
                accounts.clone(),
                withdrawals.clone(),
                audit.clone(),
            )
            .await
            .unwrap();
            svc.generate_user_wallet("alice").await.unwrap();
        }

        let mut config = test_config();
        config.master_seed = MasterSeed::from_hex(
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap();

        let result = PlatformService::new(&config, accounts, withdrawals, audit).await;
        assert!(matches!(
            result,
            Err(PlatformError::Wallet(WalletError::SeedMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_stats_aggregate() {
        let svc = service().await;
        svc.generate_user_wallet("alice").await.unwrap();
        svc.create_user("bob").await.unwrap();
        svc.deposit_bitcoin("alice", 1_000_000, "tx:0").await.unwrap();
        svc.request_withdrawal("alice", 100_000, DEST).await.unwrap();

        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.accounts, 2);
        assert_eq!(stats.wallets_assigned, 1);
        assert_eq!(stats.total_balance_sats, 1_000_000);
        assert_eq!(stats.open_reservations, 1);
        assert_eq!(stats.withdrawals.pending, 1);
    }
}
