//! Storage Layer Module
//!
//! Provides persistence for accounts, deposit events, withdrawal
//! requests and the admin audit trail.
//!
//! This module contains:
//! - Storage trait definitions for abstraction
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::{MemoryAccountStore, MemoryAuditStore, MemoryWithdrawalStore};
pub use sqlite::SqlitePlatformStore;
pub use traits::{AccountStore, AuditStore, StorageError, StorageResult, WithdrawalStore};

#[cfg(test)]
pub use traits::{MockAccountStore, MockAuditStore, MockWithdrawalStore};
