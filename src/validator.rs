//! Trade Balance Validation
//!
//! Pure decision logic for whether a custodial balance can cover a
//! proposed options trade. No storage access and no side effects:
//! callers pass the balance and quote in, and get a verdict out.
//!
//! All money math uses exact decimals. Contracts are priced at one US
//! dollar of notional each; the BTC cost is the USD cost converted at
//! the quoted price and rounded down to 8 decimal places.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use thiserror::Error;

/// Trade validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeValidationError {
    /// Balance is below the platform floor for trading at all
    #[error("balance {balance_btc} BTC is below the {minimum_btc} BTC minimum")]
    BelowMinimumBalance {
        balance_btc: Decimal,
        minimum_btc: Decimal,
    },

    /// Balance cannot cover the BTC cost of the trade
    #[error("balance {balance_btc} BTC cannot cover trade cost of {required_btc} BTC")]
    InsufficientBalance {
        required_btc: Decimal,
        balance_btc: Decimal,
    },

    /// Trade notional is below the platform minimum
    #[error("trade notional ${usd_cost} is below the ${minimum_usd} minimum")]
    BelowMinimumTrade {
        usd_cost: Decimal,
        minimum_usd: Decimal,
    },

    /// Trade notional exceeds the platform maximum
    #[error("trade notional ${usd_cost} exceeds the ${maximum_usd} maximum")]
    AboveMaximumTrade {
        usd_cost: Decimal,
        maximum_usd: Decimal,
    },

    /// The BTC price quote is unusable
    #[error("invalid price: {0}")]
    InvalidPrice(String),
}

impl TradeValidationError {
    /// Stable machine-readable code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BelowMinimumBalance { .. } => "BELOW_MINIMUM_BALANCE",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::BelowMinimumTrade { .. } => "BELOW_MINIMUM_TRADE",
            Self::AboveMaximumTrade { .. } => "ABOVE_MAXIMUM_TRADE",
            Self::InvalidPrice(_) => "INVALID_PRICE",
        }
    }
}

/// Platform limits applied by the validator
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TradeLimits {
    /// Minimum balance to trade at all, in BTC
    pub minimum_balance_btc: Decimal,
    /// Minimum trade notional, in USD
    pub minimum_trade_usd: Decimal,
    /// Maximum trade notional, in USD
    pub maximum_trade_usd: Decimal,
    /// Advisory: balances worth less than this are critical, in USD
    pub critical_balance_usd: Decimal,
    /// Advisory: balances worth less than this are low, in USD
    pub low_balance_usd: Decimal,
}

impl Default for TradeLimits {
    fn default() -> Self {
        Self {
            minimum_balance_btc: dec!(0.00001),
            minimum_trade_usd: dec!(1),
            maximum_trade_usd: dec!(1000),
            critical_balance_usd: dec!(10),
            low_balance_usd: dec!(11),
        }
    }
}

/// Cost of a proposed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TradeCost {
    /// Notional cost in USD, one dollar per contract
    pub usd_cost: Decimal,
    /// Cost converted to BTC at the quoted price, rounded down to
    /// 8 decimal places
    pub btc_cost: Decimal,
}

/// Compute the cost of a trade at the quoted BTC price.
pub fn trade_cost(
    contract_count: u32,
    btc_price_usd: Decimal,
) -> Result<TradeCost, TradeValidationError> {
    if btc_price_usd <= Decimal::ZERO {
        return Err(TradeValidationError::InvalidPrice(format!(
            "BTC price must be positive, got {}",
            btc_price_usd
        )));
    }

    let usd_cost = Decimal::from(contract_count);
    let btc_cost = usd_cost
        .checked_div(btc_price_usd)
        .ok_or_else(|| {
            TradeValidationError::InvalidPrice(format!(
                "cannot price {} contracts at {}",
                contract_count, btc_price_usd
            ))
        })?
        .round_dp_with_strategy(8, RoundingStrategy::ToZero);

    Ok(TradeCost { usd_cost, btc_cost })
}

/// Advisory classification of a balance against a price quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStanding {
    /// Below the required balance
    Insufficient,
    /// Tradeable but worth less than the critical threshold
    Critical,
    /// Tradeable but worth less than the low threshold
    Low,
    /// Comfortably above all thresholds
    Sufficient,
}

impl std::fmt::Display for BalanceStanding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insufficient => write!(f, "insufficient"),
            Self::Critical => write!(f, "critical"),
            Self::Low => write!(f, "low"),
            Self::Sufficient => write!(f, "sufficient"),
        }
    }
}

/// Advisory balance report
#[derive(Debug, Clone, Serialize)]
pub struct BalanceStatusReport {
    pub standing: BalanceStanding,
    pub balance_btc: Decimal,
    /// The requirement the balance was judged against
    pub required_balance_btc: Decimal,
    /// Balance valued at the quote, rounded down to cents
    pub balance_usd: Decimal,
    pub can_trade: bool,
}

/// The balance validator
///
/// Stateless apart from its configured limits, so it is cheap to copy
/// into handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceValidator {
    limits: TradeLimits,
}

impl BalanceValidator {
    pub fn new(limits: TradeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &TradeLimits {
        &self.limits
    }

    /// Decide whether a balance supports a proposed trade.
    ///
    /// Checks run in a fixed order so callers always see the same error
    /// for the same inputs: balance floor, then cost coverage, then
    /// notional minimum, then notional maximum.
    pub fn validate(
        &self,
        user_balance_btc: Decimal,
        contract_count: u32,
        btc_price_usd: Decimal,
    ) -> Result<TradeCost, TradeValidationError> {
        let cost = trade_cost(contract_count, btc_price_usd)?;

        if user_balance_btc < self.limits.minimum_balance_btc {
            return Err(TradeValidationError::BelowMinimumBalance {
                balance_btc: user_balance_btc,
                minimum_btc: self.limits.minimum_balance_btc,
            });
        }

        if user_balance_btc < cost.btc_cost {
            return Err(TradeValidationError::InsufficientBalance {
                required_btc: cost.btc_cost,
                balance_btc: user_balance_btc,
            });
        }

        if cost.usd_cost < self.limits.minimum_trade_usd {
            return Err(TradeValidationError::BelowMinimumTrade {
                usd_cost: cost.usd_cost,
                minimum_usd: self.limits.minimum_trade_usd,
            });
        }

        if cost.usd_cost > self.limits.maximum_trade_usd {
            return Err(TradeValidationError::AboveMaximumTrade {
                usd_cost: cost.usd_cost,
                maximum_usd: self.limits.maximum_trade_usd,
            });
        }

        Ok(cost)
    }

    /// Classify a balance against a caller-supplied requirement and the
    /// advisory USD thresholds.
    ///
    /// `Insufficient` means the balance is below `required_balance_btc`;
    /// a balance that meets the requirement is then graded `Critical` /
    /// `Low` / `Sufficient` by its USD value. Classification compares
    /// exact values; the reported USD figure is rounded down to cents
    /// afterwards.
    pub fn balance_status(
        &self,
        user_balance_btc: Decimal,
        required_balance_btc: Decimal,
        btc_price_usd: Decimal,
    ) -> Result<BalanceStatusReport, TradeValidationError> {
        if btc_price_usd <= Decimal::ZERO {
            return Err(TradeValidationError::InvalidPrice(format!(
                "BTC price must be positive, got {}",
                btc_price_usd
            )));
        }

        let exact_usd = user_balance_btc * btc_price_usd;

        let standing = if user_balance_btc < required_balance_btc {
            BalanceStanding::Insufficient
        } else if exact_usd < self.limits.critical_balance_usd {
            BalanceStanding::Critical
        } else if exact_usd < self.limits.low_balance_usd {
            BalanceStanding::Low
        } else {
            BalanceStanding::Sufficient
        };

        Ok(BalanceStatusReport {
            standing,
            balance_btc: user_balance_btc,
            required_balance_btc,
            balance_usd: exact_usd.round_dp_with_strategy(2, RoundingStrategy::ToZero),
            can_trade: standing != BalanceStanding::Insufficient,
        })
    }
}
