//! Withdrawal Types
//!
//! Records for the withdrawal approval workflow. Status lives behind a
//! closed enum and private fields: state changes go through the
//! `mark_*` methods, which only the workflow module can reach.

use serde::{Deserialize, Serialize};

/// Status of a withdrawal request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Request received, funds reserved, awaiting review
    Pending,
    /// Approved by an operator, awaiting broadcast
    Approved,
    /// Rejected by an operator, reservation released
    Rejected,
    /// Broadcast on chain, reservation committed
    Processed,
}

impl WithdrawalStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Processed)
    }
}

impl Default for WithdrawalStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Processed => write!(f, "processed"),
        }
    }
}

impl std::str::FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "processed" => Ok(Self::Processed),
            _ => Err(format!("unknown withdrawal status: {}", s)),
        }
    }
}

/// A user withdrawal request
///
/// Fields are private so callers cannot skip the workflow. Reads go
/// through the accessors; writes go through `mark_*`.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalRequest {
    /// Unique request ID, monotonically assigned
    id: u64,
    /// Owning account
    principal: String,
    /// Amount in satoshis
    amount_sats: u64,
    /// Destination Bitcoin address
    to_address: String,
    /// Current status
    status: WithdrawalStatus,
    /// Ledger reservation backing this request
    reservation_id: u64,
    /// Timestamp when the request was created
    created_at: u64,
    /// Timestamp of last status change
    updated_at: u64,
    /// Timestamp when the request reached a terminal state
    finalized_at: Option<u64>,
    /// Operator-supplied reason, set on rejection
    rejection_reason: Option<String>,
    /// On-chain transaction hash, set when processed
    tx_hash: Option<String>,
}

impl WithdrawalRequest {
    /// Create a new pending request. Workflow-internal.
    pub(super) fn new(
        id: u64,
        principal: String,
        amount_sats: u64,
        to_address: String,
        reservation_id: u64,
    ) -> Self {
        let now = unix_now();

        Self {
            id,
            principal,
            amount_sats,
            to_address,
            status: WithdrawalStatus::Pending,
            reservation_id,
            created_at: now,
            updated_at: now,
            finalized_at: None,
            rejection_reason: None,
            tx_hash: None,
        }
    }

    /// Rebuild a request from stored columns.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: u64,
        principal: String,
        amount_sats: u64,
        to_address: String,
        status: WithdrawalStatus,
        reservation_id: u64,
        created_at: u64,
        updated_at: u64,
        finalized_at: Option<u64>,
        rejection_reason: Option<String>,
        tx_hash: Option<String>,
    ) -> Self {
        Self {
            id,
            principal,
            amount_sats,
            to_address,
            status,
            reservation_id,
            created_at,
            updated_at,
            finalized_at,
            rejection_reason,
            tx_hash,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn amount_sats(&self) -> u64 {
        self.amount_sats
    }

    pub fn to_address(&self) -> &str {
        &self.to_address
    }

    pub fn status(&self) -> WithdrawalStatus {
        self.status
    }

    pub fn reservation_id(&self) -> u64 {
        self.reservation_id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    pub fn finalized_at(&self) -> Option<u64> {
        self.finalized_at
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.tx_hash.as_deref()
    }

    /// Whether the request has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether approval is a legal next step
    pub fn can_approve(&self) -> bool {
        self.status == WithdrawalStatus::Pending
    }

    /// Whether rejection is a legal next step
    pub fn can_reject(&self) -> bool {
        matches!(
            self.status,
            WithdrawalStatus::Pending | WithdrawalStatus::Approved
        )
    }

    /// Whether processing is a legal next step
    pub fn can_process(&self) -> bool {
        self.status == WithdrawalStatus::Approved
    }

    /// Mark as approved
    pub(super) fn mark_approved(&mut self) {
        self.status = WithdrawalStatus::Approved;
        self.touch();
    }

    /// Mark as rejected with the operator's reason
    pub(super) fn mark_rejected(&mut self, reason: Option<String>) {
        self.rejection_reason = reason;
        self.status = WithdrawalStatus::Rejected;
        self.touch();
        self.finalized_at = Some(self.updated_at);
    }

    /// Mark as processed with the broadcast transaction hash
    pub(super) fn mark_processed(&mut self, tx_hash: String) {
        self.tx_hash = Some(tx_hash);
        self.status = WithdrawalStatus::Processed;
        self.touch();
        self.finalized_at = Some(self.updated_at);
    }

    fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Withdrawal workflow statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalStats {
    pub total_requests: u64,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub processed: u64,
    pub total_sats_requested: u64,
    pub total_sats_processed: u64,
}

impl std::fmt::Display for WithdrawalStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Withdrawals: {} total | {} pending | {} approved | {} rejected | {} processed",
            self.total_requests, self.pending, self.approved, self.rejected, self.processed
        )
    }
}
