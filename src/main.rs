//! tollgate - Payment-Gated API Gateway
//!
//! Entry point. Architecture:
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌───────────┐    ┌─────────────┐
//! │  Client  │───▶│  Gateway  │───▶│  Handler  │───▶│ Facilitator │
//! │(X-Payment│    │ (reserve) │    │ (execute) │    │  (settle)   │
//! └──────────┘    └───────────┘    └───────────┘    └─────────────┘
//!                       │                                  ▲
//!                       └────────── Sweeper ───────────────┘
//!                            (retry + expiry passes)
//! ```
//!
//! All cross-request coordination goes through PostgreSQL conditional
//! writes; the process keeps no authoritative in-memory state.

use std::sync::Arc;

use tollgate::billing::{CreditGuard, CreditLedger, HttpUsageReporter, UsageReporter, WebhookLedger};
use tollgate::config::AppConfig;
use tollgate::db::Database;
use tollgate::gateway::{self, state::AppState};
use tollgate::payment::facilitator::SettlementFacilitator;
use tollgate::payment::{HttpFacilitator, PaymentGate, PaymentLedger, SettlementSweeper};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = tollgate::logging::init_logging(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        env = %env,
        "Starting tollgate"
    );

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    // ==========================================================================
    // Stores
    // ==========================================================================
    let db = Arc::new(Database::connect(&config.postgres_url).await?);
    let payment_ledger = Arc::new(PaymentLedger::new(db.pool().clone()));
    let credit_ledger = Arc::new(CreditLedger::new(db.pool().clone()));
    let webhook_ledger = Arc::new(WebhookLedger::new(db.pool().clone()));

    // ==========================================================================
    // External collaborators
    // ==========================================================================
    let facilitator: Option<Arc<dyn SettlementFacilitator>> = match &config.facilitator {
        Some(facilitator_config) => {
            println!("🤝 Settlement facilitator: {}", facilitator_config.url);
            Some(Arc::new(
                HttpFacilitator::new(facilitator_config)
                    .map_err(|e| anyhow::anyhow!("facilitator client: {}", e))?,
            ))
        }
        None => {
            println!("⚠️  No settlement facilitator configured (development mode)");
            None
        }
    };

    let reporter: Option<Arc<dyn UsageReporter>> = match &config.billing.metered {
        Some(metered_config) => Some(Arc::new(
            HttpUsageReporter::new(metered_config)
                .map_err(|e| anyhow::anyhow!("metered reporter: {}", e))?,
        )),
        None => {
            println!("⚠️  Metered billing disabled (credits only)");
            None
        }
    };

    // ==========================================================================
    // Request guards
    // ==========================================================================
    let payment_gate = Arc::new(
        PaymentGate::new(
            payment_ledger.clone(),
            facilitator.clone(),
            config.facilitator.as_ref().map(|f| f.url.clone()),
            config.price.clone(),
            config.sweeper.reservation_ttl_secs,
            config.development_mode,
        )
        .map_err(|e| anyhow::anyhow!("payment gate: {}", e))?,
    );

    let credit_guard = Arc::new(CreditGuard::new(
        credit_ledger.clone(),
        reporter,
        config.price.amount_micros,
    ));

    let state = Arc::new(AppState::new(
        db,
        payment_gate,
        credit_guard,
        payment_ledger.clone(),
        credit_ledger,
        webhook_ledger.clone(),
        config.billing.jwt_secret.clone(),
    ));

    // ==========================================================================
    // Shutdown wiring + background sweeper
    // ==========================================================================
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("🛑 Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let sweeper_handle = facilitator.map(|facilitator| {
        let sweeper = SettlementSweeper::new(
            payment_ledger,
            facilitator,
            webhook_ledger,
            config.sweeper.clone(),
        );
        let sweeper_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            sweeper.run(sweeper_shutdown).await;
        })
    });

    // ==========================================================================
    // Gateway
    // ==========================================================================
    #[cfg(feature = "mock-api")]
    let protected = gateway::mock_protected_routes();
    #[cfg(not(feature = "mock-api"))]
    let protected = axum::Router::new();

    let port = get_port_override().unwrap_or(config.gateway.port);
    gateway::run_server(&config.gateway.host, port, state, protected, shutdown_rx).await;

    // Server has drained; let the sweeper finish its current sweep.
    if let Some(handle) = sweeper_handle {
        let _ = handle.await;
    }

    tracing::info!("tollgate stopped");
    Ok(())
}
