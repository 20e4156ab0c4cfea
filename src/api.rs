//! REST API for the Custody Platform
//!
//! JSON adapter over `PlatformService`. Handlers hold no logic of their
//! own: they decode the request, call the service, and map the typed
//! error onto a status code and structured body.
//!
//! Monetary amounts cross this boundary as integer satoshis; responses
//! additionally carry 8-decimal BTC strings. Nothing here ever passes
//! money through binary floating point.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::PlatformError;
use crate::ledger::{BalanceSnapshot, CreditOutcome, LedgerError};
use crate::logging::generate_correlation_id;
use crate::service::PlatformService;
use crate::types::units::sats_to_btc_string;
use crate::wallet::WalletError;
use crate::withdrawal::{WithdrawalRequest, WorkflowError};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub principal: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub principal: String,
    pub deposit_address: Option<String>,
    pub balance_sats: u64,
    pub balance_btc: String,
    pub total_deposits_sats: u64,
    pub total_withdrawals_sats: u64,
    pub created_at: u64,
}

impl From<crate::types::account::UserAccount> for UserResponse {
    fn from(account: crate::types::account::UserAccount) -> Self {
        Self {
            balance_btc: account.balance_btc_string(),
            principal: account.principal,
            deposit_address: account.deposit_address,
            balance_sats: account.balance_sats,
            total_deposits_sats: account.total_deposits_sats,
            total_withdrawals_sats: account.total_withdrawals_sats,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub principal: String,
    pub deposit_address: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub principal: String,
    pub balance_sats: u64,
    pub balance_btc: String,
    pub reserved_sats: u64,
    pub spendable_sats: u64,
    pub spendable_btc: String,
    pub total_deposits_sats: u64,
    pub total_withdrawals_sats: u64,
}

impl From<BalanceSnapshot> for BalanceResponse {
    fn from(snapshot: BalanceSnapshot) -> Self {
        Self {
            balance_btc: snapshot.balance_btc_string(),
            spendable_btc: snapshot.spendable_btc_string(),
            principal: snapshot.principal,
            balance_sats: snapshot.balance_sats,
            reserved_sats: snapshot.reserved_sats,
            spendable_sats: snapshot.spendable_sats,
            total_deposits_sats: snapshot.total_deposits_sats,
            total_withdrawals_sats: snapshot.total_withdrawals_sats,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub principal: String,
    pub amount_sats: u64,
    /// Unique identifier of the on-chain deposit event, supplied by the
    /// detector. Replays credit nothing.
    pub deposit_ref: String,
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub credited: bool,
    pub balance: BalanceResponse,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTradeRequest {
    pub principal: String,
    pub contract_count: u32,
    /// Decimal string, e.g. "50000"
    pub btc_price_usd: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateTradeResponse {
    pub valid: bool,
    pub usd_cost: String,
    pub btc_cost: String,
}

#[derive(Debug, Deserialize)]
pub struct BalanceStatusQuery {
    pub btc_price_usd: String,
    /// Optional concrete funding requirement; the platform's minimum
    /// balance floor applies when absent
    pub required_balance_btc: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceStatusResponse {
    pub principal: String,
    pub standing: String,
    pub balance_btc: String,
    pub required_balance_btc: String,
    pub balance_usd: String,
    pub can_trade: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub principal: String,
    pub amount_sats: u64,
    pub to_address: String,
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub id: u64,
    pub principal: String,
    pub amount_sats: u64,
    pub amount_btc: String,
    pub to_address: String,
    pub status: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub finalized_at: Option<u64>,
    pub rejection_reason: Option<String>,
    pub tx_hash: Option<String>,
}

impl From<WithdrawalRequest> for WithdrawalResponse {
    fn from(request: WithdrawalRequest) -> Self {
        Self {
            id: request.id(),
            principal: request.principal().to_string(),
            amount_sats: request.amount_sats(),
            amount_btc: sats_to_btc_string(request.amount_sats()),
            to_address: request.to_address().to_string(),
            status: request.status().to_string(),
            created_at: request.created_at(),
            updated_at: request.updated_at(),
            finalized_at: request.finalized_at(),
            rejection_reason: request.rejection_reason().map(String::from),
            tx_hash: request.tx_hash().map(String::from),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdminActionRequest {
    /// Acting operator, recorded in the audit trail
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectWithdrawalRequest {
    pub actor: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkProcessedRequest {
    pub actor: String,
    pub tx_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminCreditRequest {
    pub actor: String,
    pub principal: String,
    pub amount_sats: u64,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub actor: String,
    /// Must be the literal "RESET" for the wipe to proceed
    pub confirm: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub details: Option<serde_json::Value>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Map a platform error onto an HTTP status: caller/validation errors are
/// 400, unknown ids 404, illegal transitions and stale reservations 409,
/// everything else 500.
fn error_status(err: &PlatformError) -> StatusCode {
    match err {
        PlatformError::Validation(_) => StatusCode::BAD_REQUEST,
        PlatformError::UnknownAccount(_) => StatusCode::NOT_FOUND,
        PlatformError::Wallet(WalletError::NotFound(_)) => StatusCode::NOT_FOUND,
        PlatformError::Ledger(inner) => match inner {
            LedgerError::InsufficientBalance { .. }
            | LedgerError::InvalidAmount(_)
            | LedgerError::InvalidReference(_) => StatusCode::BAD_REQUEST,
            LedgerError::UnknownAccount(_) => StatusCode::NOT_FOUND,
            LedgerError::UnknownReservation(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        PlatformError::Withdrawal(inner) => match inner {
            WorkflowError::InvalidAmount(_) | WorkflowError::InvalidAddress(_) => {
                StatusCode::BAD_REQUEST
            }
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::InvalidTransition { .. } => StatusCode::CONFLICT,
            WorkflowError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                StatusCode::BAD_REQUEST
            }
            WorkflowError::Ledger(LedgerError::UnknownAccount(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Structured numeric detail for errors a UI can act on
fn error_details(err: &PlatformError) -> Option<serde_json::Value> {
    match err {
        PlatformError::Ledger(LedgerError::InsufficientBalance {
            requested_sats,
            available_sats,
        })
        | PlatformError::Withdrawal(WorkflowError::Ledger(LedgerError::InsufficientBalance {
            requested_sats,
            available_sats,
        })) => Some(serde_json::json!({
            "requested_sats": requested_sats,
            "available_sats": available_sats,
        })),
        PlatformError::Validation(v) => {
            use crate::validator::TradeValidationError as V;
            match v {
                V::BelowMinimumBalance {
                    balance_btc,
                    minimum_btc,
                } => Some(serde_json::json!({
                    "balance_btc": balance_btc.to_string(),
                    "minimum_btc": minimum_btc.to_string(),
                })),
                V::InsufficientBalance {
                    required_btc,
                    balance_btc,
                } => Some(serde_json::json!({
                    "required_btc": required_btc.to_string(),
                    "balance_btc": balance_btc.to_string(),
                })),
                V::BelowMinimumTrade {
                    usd_cost,
                    minimum_usd,
                } => Some(serde_json::json!({
                    "usd_cost": usd_cost.to_string(),
                    "minimum_usd": minimum_usd.to_string(),
                })),
                V::AboveMaximumTrade {
                    usd_cost,
                    maximum_usd,
                } => Some(serde_json::json!({
                    "usd_cost": usd_cost.to_string(),
                    "maximum_usd": maximum_usd.to_string(),
                })),
                V::InvalidPrice(_) => None,
            }
        }
        PlatformError::Withdrawal(WorkflowError::InvalidTransition { id, from, .. }) => {
            Some(serde_json::json!({
                "request_id": id,
                "current_status": from.to_string(),
            }))
        }
        _ => None,
    }
}

fn error_response(err: PlatformError) -> (StatusCode, Json<ErrorResponse>) {
    let status = error_status(&err);
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.error_code(),
            details: error_details(&err),
        }),
    )
}

fn parse_price(raw: &str) -> Result<Decimal, (StatusCode, Json<ErrorResponse>)> {
    Decimal::from_str(raw.trim()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("not a decimal price: {}", raw),
                code: "INVALID_PRICE",
                details: None,
            }),
        )
    })
}

// =============================================================================
// Application State
// =============================================================================

pub type AppState = Arc<PlatformService>;

// =============================================================================
// Handlers: health and stats
// =============================================================================

/// GET /api/health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "btcopts-custody-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /api/stats
async fn handle_stats(State(service): State<AppState>) -> impl IntoResponse {
    match service.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// =============================================================================
// Handlers: users and wallets
// =============================================================================

/// POST /api/users
async fn handle_create_user(
    State(service): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    match service.create_user(&req.principal).await {
        Ok(account) => (StatusCode::OK, Json(UserResponse::from(account))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/users/:principal
async fn handle_get_user(
    State(service): State<AppState>,
    Path(principal): Path<String>,
) -> impl IntoResponse {
    match service.get_user(&principal).await {
        Ok(Some(account)) => (StatusCode::OK, Json(UserResponse::from(account))).into_response(),
        Ok(None) => error_response(PlatformError::UnknownAccount(principal)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/users/:principal/wallet
///
/// Idempotent: a repeat call returns the already-assigned address.
async fn handle_generate_wallet(
    State(service): State<AppState>,
    Path(principal): Path<String>,
) -> impl IntoResponse {
    match service.generate_user_wallet(&principal).await {
        Ok(deposit_address) => (
            StatusCode::OK,
            Json(WalletResponse {
                principal,
                deposit_address,
            }),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/users/:principal/wallet
async fn handle_get_wallet(
    State(service): State<AppState>,
    Path(principal): Path<String>,
) -> impl IntoResponse {
    match service.get_user_wallet(&principal).await {
        Ok(Some(deposit_address)) => (
            StatusCode::OK,
            Json(WalletResponse {
                principal,
                deposit_address,
            }),
        )
            .into_response(),
        Ok(None) => error_response(PlatformError::Wallet(WalletError::NotFound(principal)))
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// =============================================================================
// Handlers: balances, deposits, trade validation
// =============================================================================

/// GET /api/users/:principal/balance
async fn handle_get_balance(
    State(service): State<AppState>,
    Path(principal): Path<String>,
) -> impl IntoResponse {
    match service.get_balance(&principal).await {
        Ok(snapshot) => (StatusCode::OK, Json(BalanceResponse::from(snapshot))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/users/:principal/balance/status?btc_price_usd=50000&required_balance_btc=0.0004
async fn handle_balance_status(
    State(service): State<AppState>,
    Path(principal): Path<String>,
    Query(query): Query<BalanceStatusQuery>,
) -> impl IntoResponse {
    let price = match parse_price(&query.btc_price_usd) {
        Ok(p) => p,
        Err(resp) => return resp.into_response(),
    };

    let required = match &query.required_balance_btc {
        Some(raw) => match Decimal::from_str(raw.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("not a decimal BTC amount: {}", raw),
                        code: "INVALID_AMOUNT",
                        details: None,
                    }),
                )
                    .into_response()
            }
        },
        None => None,
    };

    match service.balance_status(&principal, required, price).await {
        Ok(report) => {
            let message = format!(
                "balance {} BTC (${}) is {} against a requirement of {} BTC",
                report.balance_btc, report.balance_usd, report.standing, report.required_balance_btc
            );
            (
                StatusCode::OK,
                Json(BalanceStatusResponse {
                    principal,
                    standing: report.standing.to_string(),
                    balance_btc: report.balance_btc.to_string(),
                    required_balance_btc: report.required_balance_btc.to_string(),
                    balance_usd: report.balance_usd.to_string(),
                    can_trade: report.can_trade,
                    message,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/deposits
///
/// The external detector reports a confirmed deposit. Replaying the same
/// `deposit_ref` is safe and credits nothing.
async fn handle_deposit(
    State(service): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> impl IntoResponse {
    let outcome = match service
        .deposit_bitcoin(&req.principal, req.amount_sats, &req.deposit_ref)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e).into_response(),
    };

    match service.get_balance(&req.principal).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(DepositResponse {
                credited: outcome == CreditOutcome::Credited,
                balance: BalanceResponse::from(snapshot),
            }),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/trades/validate
async fn handle_validate_trade(
    State(service): State<AppState>,
    Json(req): Json<ValidateTradeRequest>,
) -> impl IntoResponse {
    let price = match parse_price(&req.btc_price_usd) {
        Ok(p) => p,
        Err(resp) => return resp.into_response(),
    };

    match service
        .validate_trade(&req.principal, req.contract_count, price)
        .await
    {
        Ok(cost) => (
            StatusCode::OK,
            Json(ValidateTradeResponse {
                valid: true,
                usd_cost: cost.usd_cost.to_string(),
                btc_cost: cost.btc_cost.to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// =============================================================================
// Handlers: withdrawals
// =============================================================================

/// POST /api/withdrawals
async fn handle_request_withdrawal(
    State(service): State<AppState>,
    Json(req): Json<WithdrawRequest>,
) -> impl IntoResponse {
    match service
        .request_withdrawal(&req.principal, req.amount_sats, &req.to_address)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(WithdrawalResponse::from(request))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/withdraw
///
/// Platform-initiated convenience path: request and approve in one step.
async fn handle_withdraw(
    State(service): State<AppState>,
    Json(req): Json<WithdrawRequest>,
) -> impl IntoResponse {
    match service
        .withdraw_bitcoin(&req.principal, req.amount_sats, &req.to_address)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(WithdrawalResponse::from(request))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/withdrawals/:id
async fn handle_get_withdrawal(
    State(service): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match service.get_withdrawal(id).await {
        Ok(request) => (StatusCode::OK, Json(WithdrawalResponse::from(request))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/users/:principal/withdrawals
async fn handle_list_user_withdrawals(
    State(service): State<AppState>,
    Path(principal): Path<String>,
) -> impl IntoResponse {
    match service.list_withdrawals_for(&principal).await {
        Ok(requests) => {
            let out: Vec<WithdrawalResponse> =
                requests.into_iter().map(WithdrawalResponse::from).collect();
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/withdrawals/pending
async fn handle_list_pending_withdrawals(State(service): State<AppState>) -> impl IntoResponse {
    match service.list_pending_withdrawals().await {
        Ok(requests) => {
            let out: Vec<WithdrawalResponse> =
                requests.into_iter().map(WithdrawalResponse::from).collect();
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

// =============================================================================
// Handlers: admin
// =============================================================================

/// POST /api/admin/withdrawals/:id/approve
async fn handle_approve_withdrawal(
    State(service): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<AdminActionRequest>,
) -> impl IntoResponse {
    match service.admin_approve_withdrawal(&req.actor, id).await {
        Ok(request) => (StatusCode::OK, Json(WithdrawalResponse::from(request))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/admin/withdrawals/:id/reject
async fn handle_reject_withdrawal(
    State(service): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<RejectWithdrawalRequest>,
) -> impl IntoResponse {
    match service
        .admin_reject_withdrawal(&req.actor, id, req.reason)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(WithdrawalResponse::from(request))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/admin/withdrawals/:id/processed
async fn handle_mark_processed(
    State(service): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<MarkProcessedRequest>,
) -> impl IntoResponse {
    match service
        .admin_mark_withdrawal_processed(&req.actor, id, &req.tx_hash)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(WithdrawalResponse::from(request))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/admin/credit
async fn handle_admin_credit(
    State(service): State<AppState>,
    Json(req): Json<AdminCreditRequest>,
) -> impl IntoResponse {
    match service
        .admin_credit_user_balance(&req.actor, &req.principal, req.amount_sats)
        .await
    {
        Ok(_) => match service.get_balance(&req.principal).await {
            Ok(snapshot) => {
                (StatusCode::OK, Json(BalanceResponse::from(snapshot))).into_response()
            }
            Err(e) => error_response(e).into_response(),
        },
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/admin/reconcile
async fn handle_reconcile(
    State(service): State<AppState>,
    Json(req): Json<AdminActionRequest>,
) -> impl IntoResponse {
    match service.admin_reconcile_balances(&req.actor).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/admin/clean-test-accounts
async fn handle_clean_test_accounts(
    State(service): State<AppState>,
    Json(req): Json<AdminActionRequest>,
) -> impl IntoResponse {
    match service.admin_clean_test_accounts(&req.actor).await {
        Ok(removed) => {
            (StatusCode::OK, Json(serde_json::json!({ "removed": removed }))).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/admin/reset
///
/// Wipes all platform data except the audit trail. Requires the literal
/// confirmation token so a stray request cannot destroy state.
async fn handle_reset(
    State(service): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> impl IntoResponse {
    if req.confirm != "RESET" {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "confirmation token missing: set confirm to \"RESET\"".to_string(),
                code: "CONFIRMATION_REQUIRED",
                details: None,
            }),
        )
            .into_response();
    }

    match service.admin_reset_platform_data(&req.actor).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "reset": true }))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/admin/audit
async fn handle_audit_trail(State(service): State<AppState>) -> impl IntoResponse {
    match service.audit_entries().await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// =============================================================================
// Router Setup
// =============================================================================

/// Log every request under a fresh correlation id once the response is
/// known, so one id ties the access line to any handler events.
async fn log_request(request: Request, next: Next) -> Response {
    let correlation_id = generate_correlation_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    tracing::info!(
        target: "btcopts::http",
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "request handled"
    );
    response
}

/// Create the API router with all endpoints
pub fn create_router(service: Arc<PlatformService>) -> Router {
    // CORS configuration - allow frontend origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/stats", get(handle_stats))
        .route("/api/users", post(handle_create_user))
        .route("/api/users/:principal", get(handle_get_user))
        .route(
            "/api/users/:principal/wallet",
            post(handle_generate_wallet).get(handle_get_wallet),
        )
        .route("/api/users/:principal/balance", get(handle_get_balance))
        .route(
            "/api/users/:principal/balance/status",
            get(handle_balance_status),
        )
        .route(
            "/api/users/:principal/withdrawals",
            get(handle_list_user_withdrawals),
        )
        .route("/api/deposits", post(handle_deposit))
        .route("/api/trades/validate", post(handle_validate_trade))
        .route("/api/withdrawals", post(handle_request_withdrawal))
        .route("/api/withdrawals/pending", get(handle_list_pending_withdrawals))
        .route("/api/withdrawals/:id", get(handle_get_withdrawal))
        .route("/api/withdraw", post(handle_withdraw))
        .route(
            "/api/admin/withdrawals/:id/approve",
            post(handle_approve_withdrawal),
        )
        .route(
            "/api/admin/withdrawals/:id/reject",
            post(handle_reject_withdrawal),
        )
        .route(
            "/api/admin/withdrawals/:id/processed",
            post(handle_mark_processed),
        )
        .route("/api/admin/credit", post(handle_admin_credit))
        .route("/api/admin/reconcile", post(handle_reconcile))
        .route(
            "/api/admin/clean-test-accounts",
            post(handle_clean_test_accounts),
        )
        .route("/api/admin/reset", post(handle_reset))
        .route("/api/admin/audit", get(handle_audit_trail))
        .layer(middleware::from_fn(log_request))
        .layer(cors)
        .with_state(service)
}

/// Start the API server
pub async fn start_server(
    service: Arc<PlatformService>,
    port: u16,
) -> Result<(), std::io::Error> {
    let app = create_router(service);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    println!("=== Custody Platform API ===");
    println!("Listening on http://{}", addr);
    println!();
    println!("Endpoints:");
    println!("  POST /api/users                        - Create account");
    println!("  POST /api/users/:principal/wallet      - Derive deposit address");
    println!("  GET  /api/users/:principal/balance     - Balance view");
    println!("  POST /api/deposits                     - Credit confirmed deposit");
    println!("  POST /api/trades/validate              - Validate trade against balance");
    println!("  POST /api/withdrawals                  - Request withdrawal");
    println!("  POST /api/admin/withdrawals/:id/...    - Approve / reject / processed");
    println!("  GET  /api/admin/audit                  - Admin action record");
    println!("  GET  /api/health                       - Health check");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Network, PlatformConfig};
    use crate::storage::{MemoryAccountStore, MemoryAuditStore, MemoryWithdrawalStore};
    use crate::validator::TradeLimits;
    use crate::wallet::MasterSeed;
    use axum::{
        body::Body,
        http::{header, Method, Request},
    };
    use tower::ServiceExt;

    const TEST_SEED_HEX: &str =
        "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const DEST: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    async fn test_app() -> Router {
        let config = PlatformConfig {
            network: Network::Testnet,
            master_seed: MasterSeed::from_hex(TEST_SEED_HEX).unwrap(),
            db_path: "memory".to_string(),
            api_port: 3001,
            log_level: "info".to_string(),
            log_json: false,
            trade_limits: TradeLimits::default(),
            test_account_prefix: "test-".to_string(),
        };

        let service = PlatformService::new(
            &config,
            Arc::new(MemoryAccountStore::new()),
            Arc::new(MemoryWithdrawalStore::new()),
            Arc::new(MemoryAuditStore::new()),
        )
        .await
        .unwrap();

        create_router(Arc::new(service))
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_user_and_wallet() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/users",
                serde_json::json!({"principal": "alice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/users/alice/wallet",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first = response_json(response).await;
        let address = first["deposit_address"].as_str().unwrap().to_string();
        assert!(address.starts_with("tb1q"));

        // Repeat call returns the same address
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/users/alice/wallet",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        let second = response_json(response).await;
        assert_eq!(second["deposit_address"].as_str().unwrap(), address);
    }

    #[tokio::test]
    async fn test_unknown_user_is_404() {
        let app = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/users/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = response_json(response).await;
        assert_eq!(body["code"], "UNKNOWN_ACCOUNT");
    }

    #[tokio::test]
    async fn test_deposit_and_replay() {
        let app = test_app().await;

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/users",
                serde_json::json!({"principal": "alice"}),
            ))
            .await
            .unwrap();

        let deposit = serde_json::json!({
            "principal": "alice",
            "amount_sats": 100_000,
            "deposit_ref": "tx:0",
        });

        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/api/deposits", deposit.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["credited"], true);
        assert_eq!(body["balance"]["balance_sats"], 100_000);
        assert_eq!(body["balance"]["balance_btc"], "0.00100000");

        // Replay is accepted but credits nothing
        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/api/deposits", deposit))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["credited"], false);
        assert_eq!(body["balance"]["balance_sats"], 100_000);
    }

    #[tokio::test]
    async fn test_balance_status_against_requirement() {
        let app = test_app().await;

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/users",
                serde_json::json!({"principal": "alice"}),
            ))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/deposits",
                serde_json::json!({
                    "principal": "alice",
                    "amount_sats": 20_000,
                    "deposit_ref": "tx:0",
                }),
            ))
            .await
            .unwrap();

        // No requirement: judged against the platform floor only
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/users/alice/balance/status?btc_price_usd=50000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["standing"], "low");
        assert_eq!(body["can_trade"], true);

        // The 0.0002 BTC balance falls short of a 0.0004 BTC requirement
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/users/alice/balance/status\
                         ?btc_price_usd=50000&required_balance_btc=0.0004",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["standing"], "insufficient");
        assert_eq!(body["can_trade"], false);
        assert_eq!(body["required_balance_btc"], "0.0004");

        // An unparseable requirement is a 400
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/users/alice/balance/status\
                         ?btc_price_usd=50000&required_balance_btc=lots",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["code"], "INVALID_AMOUNT");
    }

    #[tokio::test]
    async fn test_trade_validation_codes() {
        let app = test_app().await;

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/users",
                serde_json::json!({"principal": "alice"}),
            ))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/deposits",
                serde_json::json!({
                    "principal": "alice",
                    "amount_sats": 100_000_000,
                    "deposit_ref": "tx:0",
                }),
            ))
            .await
            .unwrap();

        // Valid trade
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/trades/validate",
                serde_json::json!({
                    "principal": "alice",
                    "contract_count": 5,
                    "btc_price_usd": "50000",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["btc_cost"], "0.0001");

        // Oversized trade is a 400 with the ceiling in the details
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/trades/validate",
                serde_json::json!({
                    "principal": "alice",
                    "contract_count": 2000,
                    "btc_price_usd": "50000",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["code"], "ABOVE_MAXIMUM_TRADE");
        assert_eq!(body["details"]["usd_cost"], "2000");

        // Unparseable price
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/trades/validate",
                serde_json::json!({
                    "principal": "alice",
                    "contract_count": 1,
                    "btc_price_usd": "fifty grand",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_withdrawal_lifecycle_status_codes() {
        let app = test_app().await;

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/users",
                serde_json::json!({"principal": "alice"}),
            ))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/deposits",
                serde_json::json!({
                    "principal": "alice",
                    "amount_sats": 1_000_000,
                    "deposit_ref": "tx:0",
                }),
            ))
            .await
            .unwrap();

        // Over-balance request is a 400 with the shortfall
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/withdrawals",
                serde_json::json!({
                    "principal": "alice",
                    "amount_sats": 2_000_000,
                    "to_address": DEST,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["code"], "INSUFFICIENT_BALANCE");
        assert_eq!(body["details"]["available_sats"], 1_000_000);

        // Valid request
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/withdrawals",
                serde_json::json!({
                    "principal": "alice",
                    "amount_sats": 300_000,
                    "to_address": DEST,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        let id = body["id"].as_u64().unwrap();
        assert_eq!(body["status"], "pending");

        // Approve, then process
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/api/admin/withdrawals/{}/approve", id),
                serde_json::json!({"actor": "ops"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/api/admin/withdrawals/{}/processed", id),
                serde_json::json!({"actor": "ops", "tx_hash": "beef"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Rejecting a processed request is a 409
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/api/admin/withdrawals/{}/reject", id),
                serde_json::json!({"actor": "ops", "reason": "too late"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = response_json(response).await;
        assert_eq!(body["code"], "INVALID_TRANSITION");
        assert_eq!(body["details"]["current_status"], "processed");

        // Unknown request id is a 404
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/admin/withdrawals/999/approve",
                serde_json::json!({"actor": "ops"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reset_requires_confirmation() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/admin/reset",
                serde_json::json!({"actor": "ops", "confirm": "yes please"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/admin/reset",
                serde_json::json!({"actor": "ops", "confirm": "RESET"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The reset is on the audit record
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/audit")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body[0]["action"], "reset_platform_data");
    }
}
