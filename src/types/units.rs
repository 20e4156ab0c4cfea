//! Unit Conversion Utilities
//!
//! Helpers for Bitcoin unit conversions and formatting. Amounts are held as
//! integer satoshis internally and converted through `Decimal` so no value
//! ever passes through binary floating point.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Satoshis per Bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Convert satoshis to an exact BTC amount
pub fn sats_to_btc(sats: u64) -> Decimal {
    Decimal::from(sats) / Decimal::from(SATS_PER_BTC)
}

/// Convert satoshis to BTC string (e.g., "0.00100000")
pub fn sats_to_btc_string(sats: u64) -> String {
    format!("{:.8}", sats_to_btc(sats))
}

/// Convert satoshis to human-readable string
/// e.g., 100000 -> "100,000 sats (0.00100000 BTC)"
pub fn sats_to_display(sats: u64) -> String {
    let sats_str = format_with_commas(sats);
    format!("{} sats ({} BTC)", sats_str, sats_to_btc_string(sats))
}

/// Convert a BTC amount to satoshis.
///
/// Sub-satoshi remainders are truncated toward zero. Returns `None` for
/// negative amounts or values outside the u64 range.
pub fn btc_to_sats(btc: Decimal) -> Option<u64> {
    if btc.is_sign_negative() {
        return None;
    }
    (btc * Decimal::from(SATS_PER_BTC))
        .round_dp_with_strategy(0, RoundingStrategy::ToZero)
        .to_u64()
}

/// Format number with thousands separators
fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Parse a non-negative BTC amount from string
pub fn parse_btc(s: &str) -> Option<Decimal> {
    let value = Decimal::from_str(s.trim()).ok()?;
    if value.is_sign_negative() {
        return None;
    }
    Some(value)
}

/// Parse satoshi amount from string
pub fn parse_sats(s: &str) -> Option<u64> {
    s.trim()
        .replace(',', "")
        .replace('_', "")
        .parse()
        .ok()
}
