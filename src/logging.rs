//! Structured Logging for the Custody Backend
//!
//! Provides production-ready structured logging with:
//! - JSON output for log aggregation services
//! - Correlation IDs for request tracing
//! - Domain events for deposits, withdrawals, and admin actions
//!
//! Seeds and private key material are never logged; the startup summary
//! shows only the master seed fingerprint.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (recommended for production)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let level_str = format!("{:?}", level).to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "btcopts={},tower_http={},axum={}",
            level_str, level_str, level_str
        ))
    });

    if json_format {
        // JSON format for production
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        // Pretty format for development
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from PlatformConfig
pub fn init_from_config(config: &crate::config::PlatformConfig) -> Result<(), LoggingError> {
    let level = LogLevel::from(config.log_level.as_str());
    init_logging(level, config.log_json)
}

// ============================================================================
// Domain Events
// ============================================================================

/// Log a deposit-crediting event
pub fn log_deposit_event(principal: &str, deposit_ref: &str, amount_sats: u64, credited: bool) {
    if credited {
        tracing::info!(
            target: "btcopts::deposit",
            principal = %principal,
            deposit_ref = %deposit_ref,
            amount_sats,
            "deposit credited"
        );
    } else {
        tracing::info!(
            target: "btcopts::deposit",
            principal = %principal,
            deposit_ref = %deposit_ref,
            amount_sats,
            "deposit replay ignored"
        );
    }
}

/// Log a withdrawal lifecycle event
pub fn log_withdrawal_event(
    event_type: &str,
    request_id: u64,
    principal: &str,
    amount_sats: u64,
    to_address: &str,
    tx_hash: Option<&str>,
) {
    tracing::info!(
        target: "btcopts::withdrawal",
        event = %event_type,
        request_id,
        principal = %principal,
        amount_sats,
        to_address = %to_address,
        tx_hash = tx_hash.unwrap_or("-"),
        "withdrawal {}",
        event_type
    );
}

/// Log an administrative action
pub fn log_admin_action(actor: &str, action: &str, details: &serde_json::Value) {
    tracing::warn!(
        target: "btcopts::admin",
        actor = %actor,
        action = %action,
        details = %details,
        "admin action"
    );
}

// ============================================================================
// Request ID Generation
// ============================================================================

/// Generate a unique correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    // Simple ID format: timestamp + random suffix
    format!("{:x}-{:04x}", timestamp & 0xFFFFFFFF, rand::random::<u16>())
}

// ============================================================================
// Tests
// ============================================================================
