//! Balance Ledger
//!
//! Exact satoshi accounting for custodial balances. The ledger owns
//! the committed figures on each account record plus the in-memory
//! reservation table that holds funds aside for in-flight withdrawals.
//!
//! All mutations for one account run under that account's lock, so
//! concurrent operations on the same principal are linearized. The
//! committed balance only moves on deposit credit and reservation
//! commit; reserve and release never touch it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::logging::log_deposit_event;
use crate::storage::{AccountStore, StorageError};
use crate::types::account::DepositEvent;
use crate::types::units::sats_to_btc_string;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Requested more than the spendable balance
    #[error("insufficient balance: requested {requested_sats} sats, available {available_sats} sats")]
    InsufficientBalance {
        requested_sats: u64,
        available_sats: u64,
    },

    /// Amount failed validation
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Deposit reference failed validation
    #[error("invalid deposit reference: {0}")]
    InvalidReference(String),

    /// Reservation reference does not match any open reservation
    #[error("unknown reservation: {0}")]
    UnknownReservation(u64),

    /// Principal has no account record
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// Stored figures violate the accounting identity
    #[error("ledger inconsistency for {principal}: {detail}")]
    Inconsistency { principal: String, detail: String },

    /// Underlying storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Stable machine-readable code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidReference(_) => "INVALID_REFERENCE",
            Self::UnknownReservation(_) => "UNKNOWN_RESERVATION",
            Self::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            Self::Inconsistency { .. } => "LEDGER_INCONSISTENCY",
            Self::Storage(e) => e.error_code(),
        }
    }
}

/// Outcome of a deposit credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditOutcome {
    /// The deposit was credited to the account
    Credited,
    /// The deposit reference was seen before; nothing changed
    AlreadyCredited,
}

impl CreditOutcome {
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::AlreadyCredited)
    }
}

/// Funds held aside for an in-flight withdrawal
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    /// Unique reservation reference
    pub id: u64,
    /// Owning account
    pub principal: String,
    /// Reserved amount in satoshis
    pub amount_sats: u64,
    /// Timestamp when the reservation was taken
    pub created_at: u64,
}

/// Point-in-time balance view for one account
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSnapshot {
    pub principal: String,
    /// Committed balance
    pub balance_sats: u64,
    /// Sum of open reservations
    pub reserved_sats: u64,
    /// Committed balance minus open reservations
    pub spendable_sats: u64,
    pub total_deposits_sats: u64,
    pub total_withdrawals_sats: u64,
}

impl BalanceSnapshot {
    /// Committed balance formatted as an 8-decimal BTC string
    pub fn balance_btc_string(&self) -> String {
        sats_to_btc_string(self.balance_sats)
    }

    /// Spendable balance formatted as an 8-decimal BTC string
    pub fn spendable_btc_string(&self) -> String {
        sats_to_btc_string(self.spendable_sats)
    }
}

/// The balance ledger
///
/// Committed figures live on the account records behind `AccountStore`;
/// open reservations live here and are rebuilt from non-terminal
/// withdrawal requests after a restart.
pub struct BalanceLedger {
    accounts: Arc<dyn AccountStore>,
    /// Per-account locks, created on first use
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    /// Open reservations by ID
    reservations: RwLock<HashMap<u64, Reservation>>,
    /// Next reservation ID to hand out
    next_reservation_id: AtomicU64,
}

impl BalanceLedger {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            accounts,
            locks: RwLock::new(HashMap::new()),
            reservations: RwLock::new(HashMap::new()),
            next_reservation_id: AtomicU64::new(1),
        }
    }

    /// Get (or create) the lock that serializes mutations for one account
    async fn account_lock(&self, principal: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(principal) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(principal.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn reserved_in(map: &HashMap<u64, Reservation>, principal: &str) -> u64 {
        map.values()
            .filter(|r| r.principal == principal)
            .map(|r| r.amount_sats)
            .sum()
    }

    /// Credit a confirmed deposit to an account.
    ///
    /// Idempotent per deposit reference: a replayed reference returns
    /// `AlreadyCredited` and changes nothing. The event row is written
    /// before the balance moves, so a replay can never double-credit.
    pub async fn credit_deposit(
        &self,
        principal: &str,
        amount_sats: u64,
        deposit_ref: &str,
    ) -> Result<CreditOutcome, LedgerError> {
        if amount_sats == 0 {
            return Err(LedgerError::InvalidAmount(
                "deposit amount must be positive".to_string(),
            ));
        }

        let lock = self.account_lock(principal).await;
        let _guard = lock.lock().await;

        let mut account = self
            .accounts
            .get(principal)
            .await?
            .ok_or_else(|| LedgerError::UnknownAccount(principal.to_string()))?;

        let event = DepositEvent::new(deposit_ref, principal, amount_sats);
        match self.accounts.insert_deposit_event(&event).await {
            Ok(()) => {}
            Err(StorageError::Duplicate(_)) => {
                log_deposit_event(principal, deposit_ref, amount_sats, false);
                return Ok(CreditOutcome::AlreadyCredited);
            }
            Err(e) => return Err(e.into()),
        }

        account.apply_credit(amount_sats);
        self.accounts.update(&account).await?;

        log_deposit_event(principal, deposit_ref, amount_sats, true);
        Ok(CreditOutcome::Credited)
    }

    /// Hold funds aside for a withdrawal.
    ///
    /// Fails with `InsufficientBalance` when the amount exceeds the
    /// spendable balance (committed minus already-reserved).
    pub async fn reserve(
        &self,
        principal: &str,
        amount_sats: u64,
    ) -> Result<Reservation, LedgerError> {
        if amount_sats == 0 {
            return Err(LedgerError::InvalidAmount(
                "reservation amount must be positive".to_string(),
            ));
        }

        let lock = self.account_lock(principal).await;
        let _guard = lock.lock().await;

        let account = self
            .accounts
            .get(principal)
            .await?
            .ok_or_else(|| LedgerError::UnknownAccount(principal.to_string()))?;

        let mut reservations = self.reservations.write().await;
        let reserved = Self::reserved_in(&reservations, principal);
        let spendable = account.balance_sats.saturating_sub(reserved);

        if amount_sats > spendable {
            return Err(LedgerError::InsufficientBalance {
                requested_sats: amount_sats,
                available_sats: spendable,
            });
        }

        let id = self.next_reservation_id.fetch_add(1, Ordering::SeqCst);
        let reservation = Reservation {
            id,
            principal: principal.to_string(),
            amount_sats,
            created_at: unix_now(),
        };
        reservations.insert(id, reservation.clone());

        tracing::debug!(
            target: "btcopts::ledger",
            principal = %principal,
            reservation_id = id,
            amount_sats = amount_sats,
            spendable_after = spendable - amount_sats,
            "funds reserved"
        );

        Ok(reservation)
    }

    /// Release a reservation, returning the funds to the spendable
    /// balance. The committed balance does not move.
    pub async fn release_reservation(&self, reservation_id: u64) -> Result<Reservation, LedgerError> {
        let principal = self
            .reservation_principal(reservation_id)
            .await
            .ok_or(LedgerError::UnknownReservation(reservation_id))?;

        let lock = self.account_lock(&principal).await;
        let _guard = lock.lock().await;

        let mut reservations = self.reservations.write().await;
        let reservation = reservations
            .remove(&reservation_id)
            .ok_or(LedgerError::UnknownReservation(reservation_id))?;

        tracing::debug!(
            target: "btcopts::ledger",
            principal = %reservation.principal,
            reservation_id = reservation_id,
            amount_sats = reservation.amount_sats,
            "reservation released"
        );

        Ok(reservation)
    }

    /// Commit a reservation as a completed withdrawal: the committed
    /// balance drops by the reserved amount and the reservation closes.
    pub async fn commit_reservation(
        &self,
        reservation_id: u64,
        tx_hash: &str,
    ) -> Result<Reservation, LedgerError> {
        let principal = self
            .reservation_principal(reservation_id)
            .await
            .ok_or(LedgerError::UnknownReservation(reservation_id))?;

        let lock = self.account_lock(&principal).await;
        let _guard = lock.lock().await;

        let mut reservations = self.reservations.write().await;
        let amount_sats = match reservations.get(&reservation_id) {
            Some(reservation) => reservation.amount_sats,
            None => return Err(LedgerError::UnknownReservation(reservation_id)),
        };

        let mut account = self
            .accounts
            .get(&principal)
            .await?
            .ok_or_else(|| LedgerError::UnknownAccount(principal.clone()))?;

        if !account.apply_debit(amount_sats) {
            return Err(LedgerError::Inconsistency {
                principal: principal.clone(),
                detail: format!(
                    "committed balance {} cannot cover reserved {} sats",
                    account.balance_sats, amount_sats
                ),
            });
        }

        self.accounts.update(&account).await?;

        // Only drop the reservation once the debit is durably recorded
        let reservation = reservations
            .remove(&reservation_id)
            .ok_or(LedgerError::UnknownReservation(reservation_id))?;

        tracing::info!(
            target: "btcopts::ledger",
            principal = %principal,
            reservation_id = reservation_id,
            amount_sats = amount_sats,
            tx_hash = %tx_hash,
            balance_sats = account.balance_sats,
            "reservation committed"
        );

        Ok(reservation)
    }

    /// Current balance view for an account
    pub async fn balance(&self, principal: &str) -> Result<BalanceSnapshot, LedgerError> {
        let account = self
            .accounts
            .get(principal)
            .await?
            .ok_or_else(|| LedgerError::UnknownAccount(principal.to_string()))?;

        let reservations = self.reservations.read().await;
        let reserved_sats = Self::reserved_in(&reservations, principal);

        Ok(BalanceSnapshot {
            principal: account.principal.clone(),
            balance_sats: account.balance_sats,
            reserved_sats,
            spendable_sats: account.balance_sats.saturating_sub(reserved_sats),
            total_deposits_sats: account.total_deposits_sats,
            total_withdrawals_sats: account.total_withdrawals_sats,
        })
    }

    /// Sum of open reservations for an account
    pub async fn reserved_for(&self, principal: &str) -> u64 {
        let reservations = self.reservations.read().await;
        Self::reserved_in(&reservations, principal)
    }

    /// Whether an account has any open reservations
    pub async fn has_open_reservations(&self, principal: &str) -> bool {
        self.reserved_for(principal).await > 0
    }

    /// Look up one open reservation
    pub async fn reservation(&self, reservation_id: u64) -> Option<Reservation> {
        let reservations = self.reservations.read().await;
        reservations.get(&reservation_id).cloned()
    }

    /// All open reservations
    pub async fn open_reservations(&self) -> Vec<Reservation> {
        let reservations = self.reservations.read().await;
        let mut all: Vec<Reservation> = reservations.values().cloned().collect();
        all.sort_by_key(|r| r.id);
        all
    }

    /// Re-open a reservation recorded before a restart, keeping its
    /// original ID and advancing the ID counter past it.
    pub async fn recover_reservation(&self, reservation: Reservation) {
        self.next_reservation_id
            .fetch_max(reservation.id + 1, Ordering::SeqCst);

        let mut reservations = self.reservations.write().await;
        reservations.insert(reservation.id, reservation);
    }

    /// Drop every open reservation. Used by the platform reset.
    pub async fn clear_reservations(&self) {
        let mut reservations = self.reservations.write().await;
        reservations.clear();
    }

    async fn reservation_principal(&self, reservation_id: u64) -> Option<String> {
        let reservations = self.reservations.read().await;
        reservations.get(&reservation_id).map(|r| r.principal.clone())
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
