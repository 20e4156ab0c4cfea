//! Environment-based Configuration for the Custody Backend
//!
//! This module provides secure configuration loading from environment
//! variables. All sensitive values (the master seed above all) MUST come
//! from environment variables, never from hardcoded values.
//!
//! # Environment Variables
//!
//! ## Network Configuration
//! - `BTCOPTS_NETWORK` - "mainnet", "testnet", or "regtest" (default: "testnet")
//!
//! ## Key Material
//! - `BTCOPTS_MASTER_SEED` - hex-encoded master seed (16-64 bytes). REQUIRED.
//!   Startup aborts if it is missing or malformed; the engine never falls
//!   back to generated randomness.
//!
//! ## Storage
//! - `BTCOPTS_DB_PATH` - SQLite database path (default: "data/btcopts.db"),
//!   or the literal "memory" for in-memory stores
//!
//! ## API
//! - `BTCOPTS_API_PORT` - HTTP port (default: 3001)
//!
//! ## Trade Limits
//! - `BTCOPTS_MIN_BALANCE_BTC` - minimum balance to trade (default: 0.00001)
//! - `BTCOPTS_MIN_TRADE_USD` - minimum trade size (default: 1)
//! - `BTCOPTS_MAX_TRADE_USD` - maximum trade size (default: 1000)
//!
//! ## Optional Settings
//! - `BTCOPTS_LOG_LEVEL` - logging level (debug, info, warn, error)
//! - `BTCOPTS_LOG_JSON` - set to "1" for JSON log output
//! - `BTCOPTS_TEST_ACCOUNT_PREFIX` - principal prefix eligible for test
//!   cleanup (default: "test-")

use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::validator::TradeLimits;
use crate::wallet::MasterSeed;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// The master seed is absent or unusable. Fatal: the process must not
    /// start, and must never substitute generated randomness for it.
    #[error("master seed unavailable: {0}")]
    MasterSeedUnavailable(String),
}

impl ConfigError {
    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::MissingEnvVar(_) => "CONFIG_ERROR",
            ConfigError::InvalidValue(_, _) => "CONFIG_ERROR",
            ConfigError::MasterSeedUnavailable(_) => "MASTER_SEED_UNAVAILABLE",
        }
    }
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" | "local" => Ok(Network::Regtest),
            _ => Err(ConfigError::InvalidValue(
                "BTCOPTS_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        write!(f, "{}", s)
    }
}

impl Network {
    /// Get bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }

    /// BIP44-style coin type for derivation paths
    pub fn coin_type(&self) -> u32 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet | Network::Regtest => 1,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Network environment
    pub network: Network,

    /// Master seed for deposit-address derivation (never logged)
    pub master_seed: MasterSeed,

    /// SQLite database path, or "memory" for in-memory stores
    pub db_path: String,

    /// HTTP API port
    pub api_port: u16,

    /// Log level
    pub log_level: String,

    /// Emit JSON-formatted logs
    pub log_json: bool,

    /// Trade validation limits
    pub trade_limits: TradeLimits,

    /// Principal prefix eligible for test-account cleanup
    pub test_account_prefix: String,
}

impl PlatformConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env::var("BTCOPTS_NETWORK")
            .unwrap_or_else(|_| "testnet".to_string())
            .parse()?;

        // The master seed is the one value with no default on any network.
        let seed_hex = env::var("BTCOPTS_MASTER_SEED").map_err(|_| {
            ConfigError::MasterSeedUnavailable("BTCOPTS_MASTER_SEED is not set".to_string())
        })?;
        let master_seed = MasterSeed::from_hex(seed_hex.trim())
            .map_err(|e| ConfigError::MasterSeedUnavailable(e.to_string()))?;

        let db_path = env::var("BTCOPTS_DB_PATH").unwrap_or_else(|_| "data/btcopts.db".to_string());

        let api_port = match env::var("BTCOPTS_API_PORT") {
            Ok(v) => v.parse().map_err(|_| {
                ConfigError::InvalidValue("BTCOPTS_API_PORT".to_string(), v.clone())
            })?,
            Err(_) => 3001,
        };

        let log_level = env::var("BTCOPTS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("BTCOPTS_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        let mut trade_limits = TradeLimits::default();
        if let Some(v) = parse_decimal_var("BTCOPTS_MIN_BALANCE_BTC")? {
            trade_limits.minimum_balance_btc = v;
        }
        if let Some(v) = parse_decimal_var("BTCOPTS_MIN_TRADE_USD")? {
            trade_limits.minimum_trade_usd = v;
        }
        if let Some(v) = parse_decimal_var("BTCOPTS_MAX_TRADE_USD")? {
            trade_limits.maximum_trade_usd = v;
        }
        if trade_limits.minimum_trade_usd > trade_limits.maximum_trade_usd {
            return Err(ConfigError::InvalidValue(
                "BTCOPTS_MIN_TRADE_USD".to_string(),
                "minimum trade cannot exceed maximum trade".to_string(),
            ));
        }

        let test_account_prefix =
            env::var("BTCOPTS_TEST_ACCOUNT_PREFIX").unwrap_or_else(|_| "test-".to_string());

        Ok(Self {
            network,
            master_seed,
            db_path,
            api_port,
            log_level,
            log_json,
            trade_limits,
            test_account_prefix,
        })
    }

    /// Whether the in-memory stores were selected
    pub fn uses_memory_stores(&self) -> bool {
        self.db_path == "memory"
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.network == Network::Mainnet && self.uses_memory_stores() {
            return Err(ConfigError::InvalidValue(
                "BTCOPTS_DB_PATH".to_string(),
                "in-memory stores not allowed on mainnet".to_string(),
            ));
        }
        Ok(())
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== Custody Backend Configuration ===");
        println!("Network: {}", self.network);
        println!("Master Seed: fingerprint {}", self.master_seed.fingerprint());
        println!("Database: {}", self.db_path);
        println!("API Port: {}", self.api_port);
        println!(
            "Trade Limits: min balance {} BTC | ${} - ${} per trade",
            self.trade_limits.minimum_balance_btc,
            self.trade_limits.minimum_trade_usd,
            self.trade_limits.maximum_trade_usd
        );
        println!("Test Account Prefix: {}", self.test_account_prefix);
        println!("Log Level: {}", self.log_level);
        println!("=====================================");
    }
}

/// Parse an optional decimal-valued env var
fn parse_decimal_var(var_name: &str) -> Result<Option<Decimal>, ConfigError> {
    match env::var(var_name) {
        Ok(v) => {
            let value = Decimal::from_str(v.trim()).map_err(|_| {
                ConfigError::InvalidValue(var_name.to_string(), format!("not a decimal: {}", v))
            })?;
            if value.is_sign_negative() {
                return Err(ConfigError::InvalidValue(
                    var_name.to_string(),
                    "must not be negative".to_string(),
                ));
            }
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}
