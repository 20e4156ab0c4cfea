//! Withdrawal Module
//!
//! Withdrawal requests and the approval workflow that drives them.

pub mod types;
pub mod workflow;

// Re-exports for convenience
pub use types::{WithdrawalRequest, WithdrawalStats, WithdrawalStatus};
pub use workflow::{WithdrawalWorkflow, WorkflowError};
