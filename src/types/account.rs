//! User Account Types
//!
//! The custody-side view of a platform user: one deposit address, exact
//! satoshi balances, and the append-only deposit events that credit them.

use serde::{Deserialize, Serialize};

use crate::types::units::sats_to_btc_string;

/// A custodial user account.
///
/// `balance_sats` is the committed balance (`total_deposits_sats -
/// total_withdrawals_sats`). In-flight withdrawal reservations are tracked
/// by the ledger, not on the account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Opaque stable user identifier, assigned externally at registration
    pub principal: String,
    /// Deposit address, assigned exactly once and never reassigned
    pub deposit_address: Option<String>,
    /// Derivation index backing the deposit address
    pub derivation_index: Option<u32>,
    /// Committed balance in satoshis
    pub balance_sats: u64,
    /// Cumulative credited deposits in satoshis
    pub total_deposits_sats: u64,
    /// Cumulative processed withdrawals in satoshis
    pub total_withdrawals_sats: u64,
    /// Timestamp when the account was created
    pub created_at: u64,
    /// Timestamp of last balance or wallet change
    pub updated_at: u64,
}

impl UserAccount {
    /// Create a new empty account for a principal
    pub fn new(principal: impl Into<String>) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            principal: principal.into(),
            deposit_address: None,
            derivation_index: None,
            balance_sats: 0,
            total_deposits_sats: 0,
            total_withdrawals_sats: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the derived wallet for this account.
    ///
    /// The address is immutable once set; returns false (and changes
    /// nothing) if an address is already recorded.
    pub fn assign_wallet(&mut self, address: String, index: u32) -> bool {
        if self.deposit_address.is_some() {
            return false;
        }
        self.deposit_address = Some(address);
        self.derivation_index = Some(index);
        self.touch();
        true
    }

    /// Apply a deposit credit
    pub fn apply_credit(&mut self, amount_sats: u64) {
        self.balance_sats += amount_sats;
        self.total_deposits_sats += amount_sats;
        self.touch();
    }

    /// Apply a withdrawal debit.
    ///
    /// Returns false (and changes nothing) if the committed balance cannot
    /// cover the amount; callers treat that as a ledger inconsistency.
    pub fn apply_debit(&mut self, amount_sats: u64) -> bool {
        match self.balance_sats.checked_sub(amount_sats) {
            Some(remaining) => {
                self.balance_sats = remaining;
                self.total_withdrawals_sats += amount_sats;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Committed balance formatted as an 8-decimal BTC string
    pub fn balance_btc_string(&self) -> String {
        sats_to_btc_string(self.balance_sats)
    }

    /// Check the accounting identity on this record
    pub fn totals_consistent(&self) -> bool {
        self.total_deposits_sats
            .checked_sub(self.total_withdrawals_sats)
            .map(|expected| expected == self.balance_sats)
            .unwrap_or(false)
    }

    /// Update timestamp
    fn touch(&mut self) {
        self.updated_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
    }
}

/// One confirmed on-chain deposit, keyed by its unique reference.
///
/// The reference (typically `txid:vout`) is the idempotency key for
/// crediting: storage rejects a second event with the same reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Unique identifier of the on-chain deposit event
    pub deposit_ref: String,
    /// Principal whose account was credited
    pub principal: String,
    /// Credited amount in satoshis
    pub amount_sats: u64,
    /// Timestamp when the credit was applied
    pub credited_at: u64,
}

impl DepositEvent {
    pub fn new(
        deposit_ref: impl Into<String>,
        principal: impl Into<String>,
        amount_sats: u64,
    ) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            deposit_ref: deposit_ref.into(),
            principal: principal.into(),
            amount_sats,
            credited_at: now,
        }
    }
}
