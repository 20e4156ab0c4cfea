//! Storage Trait Definitions
//!
//! Defines abstract storage interfaces for accounts, withdrawals and
//! the admin audit trail. Implementations can use SQLite (production)
//! or in-memory (testing, demos).

use async_trait::async_trait;
use thiserror::Error;

use crate::audit::AdminAction;
use crate::types::account::{DepositEvent, UserAccount};
use crate::withdrawal::{WithdrawalRequest, WithdrawalStatus};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl StorageError {
    /// Stable machine-readable code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "STORAGE_NOT_FOUND",
            Self::Duplicate(_) => "STORAGE_DUPLICATE",
            Self::Database(_) => "STORAGE_DATABASE_ERROR",
            Self::InvalidData(_) => "STORAGE_INVALID_DATA",
            Self::Connection(_) => "STORAGE_CONNECTION_ERROR",
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Account storage interface
///
/// Implementations:
/// - `SqlitePlatformStore` - Production storage with SQLite
/// - `MemoryAccountStore` - In-memory storage for testing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Fails with `Duplicate` if the principal
    /// already exists.
    async fn insert(&self, account: &UserAccount) -> StorageResult<()>;

    /// Update an existing account
    async fn update(&self, account: &UserAccount) -> StorageResult<()>;

    /// Get an account by principal
    async fn get(&self, principal: &str) -> StorageResult<Option<UserAccount>>;

    /// Get an account by its assigned deposit address
    async fn get_by_address(&self, address: &str) -> StorageResult<Option<UserAccount>>;

    /// Get all accounts
    async fn get_all(&self) -> StorageResult<Vec<UserAccount>>;

    /// Delete an account by principal. Returns true if it existed.
    async fn delete(&self, principal: &str) -> StorageResult<bool>;

    /// Get count of accounts
    async fn count(&self) -> StorageResult<usize>;

    /// Record a credited deposit. Fails with `Duplicate` if the
    /// deposit reference was already recorded.
    async fn insert_deposit_event(&self, event: &DepositEvent) -> StorageResult<()>;

    /// Get deposit events credited to a principal, oldest first
    async fn deposit_events_for(&self, principal: &str) -> StorageResult<Vec<DepositEvent>>;

    /// Drop the deposit history for a principal. Returns the number of
    /// events removed.
    async fn delete_deposit_events_for(&self, principal: &str) -> StorageResult<u64>;

    /// Remove all accounts and deposit events
    async fn clear(&self) -> StorageResult<()>;
}

/// Withdrawal request storage interface
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Insert a new request. Fails with `Duplicate` if the ID exists.
    async fn insert(&self, request: &WithdrawalRequest) -> StorageResult<()>;

    /// Update an existing request
    async fn update(&self, request: &WithdrawalRequest) -> StorageResult<()>;

    /// Get a request by ID
    async fn get(&self, id: u64) -> StorageResult<Option<WithdrawalRequest>>;

    /// Get all requests with a specific status
    async fn get_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> StorageResult<Vec<WithdrawalRequest>>;

    /// Get all requests for a principal, oldest first
    async fn get_for_user(&self, principal: &str) -> StorageResult<Vec<WithdrawalRequest>>;

    /// Get all requests
    async fn get_all(&self) -> StorageResult<Vec<WithdrawalRequest>>;

    /// Highest request ID ever stored, or 0 when empty. Seeds the ID
    /// counter after a restart.
    async fn max_id(&self) -> StorageResult<u64>;

    /// Remove all requests
    async fn clear(&self) -> StorageResult<()>;
}

/// Admin audit storage interface
///
/// Append-only: there is no delete or clear, audit history survives
/// every reset.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one record
    async fn append(&self, entry: &AdminAction) -> StorageResult<()>;

    /// Get all records, oldest first
    async fn entries(&self) -> StorageResult<Vec<AdminAction>>;
}
