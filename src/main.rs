//! Custody Backend Launcher
//!
//! Run modes:
//!   cargo run -- api             - Start the REST API server
//!   cargo run -- demo            - Run an in-memory walkthrough
//!
//! Configuration comes from the environment (see `config`); a `.env`
//! file is loaded if present. The master seed is required for the `api`
//! mode and startup aborts without it.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use btcopts::api;
use btcopts::config::{ConfigError, PlatformConfig};
use btcopts::logging;
use btcopts::storage::{
    AccountStore, AuditStore, MemoryAccountStore, MemoryAuditStore, MemoryWithdrawalStore,
    SqlitePlatformStore, WithdrawalStore,
};
use btcopts::units;
use btcopts::{MasterSeed, PlatformService, TradeLimits};
use rust_decimal_macros::dec;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::SUCCESS;
    }

    match args[1].as_str() {
        "api" => run_api_server().await,
        "demo" => run_demo().await,
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        _ => {
            print_usage();
            ExitCode::SUCCESS
        }
    }
}

fn print_usage() {
    println!("Custody Backend - Bitcoin Options Platform");
    println!();
    println!("Usage:");
    println!("  btcopts-api api      Start the REST API server");
    println!("  btcopts-api demo     Run an in-memory walkthrough");
    println!();
    println!("Environment Variables:");
    println!("  BTCOPTS_MASTER_SEED     Hex-encoded master seed (16-64 bytes). REQUIRED.");
    println!("  BTCOPTS_NETWORK         mainnet | testnet | regtest (default: testnet)");
    println!("  BTCOPTS_DB_PATH         SQLite path, or \"memory\" (default: data/btcopts.db)");
    println!("  BTCOPTS_API_PORT        REST API port (default: 3001)");
    println!("  BTCOPTS_LOG_LEVEL       debug | info | warn | error (default: info)");
    println!("  BTCOPTS_LOG_JSON        Set to 1 for JSON log output");
    println!("  BTCOPTS_MIN_BALANCE_BTC / BTCOPTS_MIN_TRADE_USD / BTCOPTS_MAX_TRADE_USD");
    println!("                          Trade limit overrides");
}

/// Start the REST API server over the configured stores
async fn run_api_server() -> ExitCode {
    let config = match PlatformConfig::from_env() {
        Ok(config) => config,
        Err(e @ ConfigError::MasterSeedUnavailable(_)) => {
            eprintln!("Fatal: {}", e);
            eprintln!("Set BTCOPTS_MASTER_SEED; the engine never substitutes generated randomness.");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.validate_for_production() {
        eprintln!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = logging::init_from_config(&config) {
        eprintln!("Logging error: {}", e);
        return ExitCode::FAILURE;
    }

    config.print_summary();

    let (accounts, withdrawals, audit): (
        Arc<dyn AccountStore>,
        Arc<dyn WithdrawalStore>,
        Arc<dyn AuditStore>,
    ) = if config.uses_memory_stores() {
        (
            Arc::new(MemoryAccountStore::new()),
            Arc::new(MemoryWithdrawalStore::new()),
            Arc::new(MemoryAuditStore::new()),
        )
    } else {
        let store = match SqlitePlatformStore::new(&config.db_path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("Storage error: {}", e);
                return ExitCode::FAILURE;
            }
        };
        (store.clone(), store.clone(), store)
    };

    let service = match PlatformService::new(&config, accounts, withdrawals, audit).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            eprintln!("Startup error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = api::start_server(service, config.api_port).await {
        eprintln!("API server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// End-to-end walkthrough against in-memory stores
async fn run_demo() -> ExitCode {
    println!("\n=== Custody Backend Demo ===\n");

    let master_seed = match MasterSeed::from_hex(
        "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
    ) {
        Ok(seed) => seed,
        Err(e) => {
            eprintln!("Demo setup error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = PlatformConfig {
        network: btcopts::Network::Testnet,
        master_seed,
        db_path: "memory".to_string(),
        api_port: 3001,
        log_level: "warn".to_string(),
        log_json: false,
        trade_limits: TradeLimits::default(),
        test_account_prefix: "test-".to_string(),
    };

    let service = match PlatformService::new(
        &config,
        Arc::new(MemoryAccountStore::new()),
        Arc::new(MemoryWithdrawalStore::new()),
        Arc::new(MemoryAuditStore::new()),
    )
    .await
    {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Demo setup error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = walkthrough(&service).await {
        eprintln!("Demo error: {}", e);
        return ExitCode::FAILURE;
    }

    println!("\n=== Demo Complete ===");
    ExitCode::SUCCESS
}

async fn walkthrough(service: &PlatformService) -> btcopts::Result<()> {
    println!("1. DERIVE DEPOSIT ADDRESS");
    let address = service.generate_user_wallet("demo-alice").await?;
    println!("   alice's deposit address: {}", address);
    let again = service.generate_user_wallet("demo-alice").await?;
    println!("   repeat call returns the same address: {}", again == address);
    println!();

    println!("2. CREDIT A CONFIRMED DEPOSIT");
    service
        .deposit_bitcoin("demo-alice", 1_000_000, "demo-tx:0")
        .await?;
    let replay = service
        .deposit_bitcoin("demo-alice", 1_000_000, "demo-tx:0")
        .await?;
    let balance = service.get_balance("demo-alice").await?;
    println!("   credited: {}", units::sats_to_display(balance.balance_sats));
    println!("   replaying the same deposit ref credits nothing: {:?}", replay);
    println!();

    println!("3. VALIDATE A TRADE (5 contracts at $50,000/BTC)");
    let cost = service
        .validate_trade("demo-alice", 5, dec!(50000))
        .await?;
    println!("   cost: ${} = {} BTC", cost.usd_cost, cost.btc_cost);
    println!();

    println!("4. WITHDRAWAL LIFECYCLE");
    let request = service
        .request_withdrawal(
            "demo-alice",
            300_000,
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx",
        )
        .await?;
    println!("   request #{} created ({})", request.id(), request.status());
    let balance = service.get_balance("demo-alice").await?;
    println!(
        "   reserved: {} | spendable: {}",
        units::sats_to_display(balance.reserved_sats),
        units::sats_to_display(balance.spendable_sats),
    );

    service.admin_approve_withdrawal("demo-ops", request.id()).await?;
    service
        .admin_mark_withdrawal_processed("demo-ops", request.id(), "demo-broadcast-txid")
        .await?;
    let balance = service.get_balance("demo-alice").await?;
    println!(
        "   after broadcast: balance {} | withdrawn {}",
        units::sats_to_display(balance.balance_sats),
        units::sats_to_display(balance.total_withdrawals_sats),
    );
    println!();

    println!("5. AUDIT TRAIL");
    for entry in service.audit_entries().await? {
        println!("   [{}] {} by {}", entry.timestamp, entry.action, entry.actor);
    }

    Ok(())
}
