//! Custody backend for a Bitcoin options platform.
//!
//! The platform holds Bitcoin custodially to fund options trades. This
//! crate is the part with invariants to protect:
//!
//! 1. **Key derivation** - one deterministic deposit address per user
//!    from a single master seed; repeat calls never mint a second one.
//! 2. **Balance ledger** - the single source of truth for spendable
//!    balance, with reservation semantics for in-flight withdrawals.
//! 3. **Withdrawal workflow** - an approval-gated state machine whose
//!    transitions are the only call sites that move reserved funds.
//! 4. **Trade validation** - pure decimal checks gating every order.
//!
//! Deposit detection and broadcast confirmation live outside this crate;
//! they report already-resolved facts through the service layer or the
//! REST API in `api`.

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod service;
pub mod storage;
pub mod types;
pub mod validator;
pub mod wallet;
pub mod withdrawal;

// Re-exports: crate error
pub use error::{PlatformError, Result};

// Re-exports: configuration
pub use config::{ConfigError, Network, PlatformConfig};

// Re-exports: key derivation
pub use wallet::{DerivedWallet, KeyDerivationEngine, MasterSeed, WalletError};

// Re-exports: ledger
pub use ledger::{BalanceLedger, BalanceSnapshot, CreditOutcome, LedgerError, Reservation};

// Re-exports: withdrawal workflow
pub use withdrawal::{
    WithdrawalRequest, WithdrawalStats, WithdrawalStatus, WithdrawalWorkflow, WorkflowError,
};

// Re-exports: trade validation
pub use validator::{
    trade_cost, BalanceStanding, BalanceStatusReport, BalanceValidator, TradeCost, TradeLimits,
    TradeValidationError,
};

// Re-exports: service layer
pub use service::{PlatformService, PlatformStats, ReconcileReport};

// Re-exports: storage
pub use storage::{
    AccountStore, AuditStore, MemoryAccountStore, MemoryAuditStore, MemoryWithdrawalStore,
    SqlitePlatformStore, StorageError, StorageResult, WithdrawalStore,
};

// Re-exports: shared types
pub use types::account::{DepositEvent, UserAccount};
pub use types::units;
