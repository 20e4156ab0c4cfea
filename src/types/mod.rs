//! Shared Types Module
//!
//! Data types shared across the custody backend.

pub mod account;
pub mod units;

// Re-exports for convenience
pub use account::{DepositEvent, UserAccount};
pub use units::{
    btc_to_sats, parse_btc, parse_sats, sats_to_btc, sats_to_btc_string, sats_to_display,
    SATS_PER_BTC,
};
