//! Common Error Types for the Custody Backend
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::logging::LoggingError;
use crate::storage::StorageError;
use crate::validator::TradeValidationError;
use crate::wallet::WalletError;
use crate::withdrawal::WorkflowError;

/// Root error type for the custody backend
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    /// Key derivation errors
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    /// Balance ledger errors
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Withdrawal workflow errors
    #[error("withdrawal error: {0}")]
    Withdrawal(#[from] WorkflowError),

    /// Trade validation errors
    #[error("validation error: {0}")]
    Validation(#[from] TradeValidationError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Unknown principal
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Storage(_) | PlatformError::Io(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            PlatformError::Config(e) => e.error_code(),
            PlatformError::Logging(_) => "LOGGING_ERROR",
            PlatformError::Wallet(e) => e.error_code(),
            PlatformError::Ledger(e) => e.error_code(),
            PlatformError::Withdrawal(e) => e.error_code(),
            PlatformError::Validation(e) => e.error_code(),
            PlatformError::Storage(_) => "STORAGE_ERROR",
            PlatformError::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            PlatformError::Internal(_) => "INTERNAL_ERROR",
            PlatformError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using PlatformError
pub type Result<T> = std::result::Result<T, PlatformError>;
