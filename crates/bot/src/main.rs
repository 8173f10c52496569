use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use equity_bot::config;
use equity_bot::core::data_service::DataService;
use equity_bot::core::predictor::TradePredictor;
use equity_bot::core::strategy::Strategy;
use equity_bot::execution::BrokerClient;
use equity_bot::logging;
use equity_bot::notify::Notifier;
use equity_bot::storage::TradeStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    // Determine config directory — default to `./config`.
    let config_dir = std::env::var("BOT_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    // Load and validate configuration.
    let config = config::load_config(&config_dir)?;

    // Initialize tracing — hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    info!(
        symbols = config.trading.symbols.len(),
        capital = %config.trading.capital,
        paper = config.trading.paper_trading,
        policy = ?config.signals.policy,
        "equity bot starting"
    );

    // -----------------------------------------------------------------------
    // Component construction (dependency injection order)
    // -----------------------------------------------------------------------

    // 1. Persistent stores
    let data_dir = PathBuf::from(&config.app.data_dir);
    let store = Arc::new(TradeStore::open(&data_dir).context("failed to open trade store")?);

    // 2. Brokerage client (credentials from env; absent is fine in paper mode)
    let credentials = config::broker_credentials_from_env();
    let broker = Arc::new(BrokerClient::new(
        config.broker.clone(),
        credentials,
        config.trading.paper_trading,
    )?);

    // 3. Market data service
    let data = Arc::new(DataService::new(config.market_data.clone())?);

    // 4. Notifier (token/chat id from env)
    let notifier = Arc::new(Notifier::from_env(&config.notifications.telegram)?);

    // 5. Success predictor, restored from disk when a model exists
    let predictor = TradePredictor::new(config.learning.ml.clone(), store.load_model());

    info!("all components initialized");

    // -----------------------------------------------------------------------
    // Broker session — the only fatal failure point
    // -----------------------------------------------------------------------

    if !broker.login().await {
        anyhow::bail!("broker login failed at startup");
    }
    broker.load_scrip_master().await;

    // -----------------------------------------------------------------------
    // Strategy loop + shutdown handling
    // -----------------------------------------------------------------------

    let shutdown = CancellationToken::new();
    let mut strategy = Strategy::new(
        config,
        broker,
        data,
        notifier,
        store,
        predictor,
        shutdown.clone(),
    );
    strategy.bootstrap().await?;

    let strategy_handle = tokio::spawn(async move {
        if let Err(e) = strategy.run().await {
            error!(error = %e, "strategy loop exited with error");
        }
    });

    info!("trading loop running — press Ctrl+C to shutdown");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutdown signal received, stopping gracefully...");
    shutdown.cancel();

    if let Err(e) = strategy_handle.await {
        error!(error = %e, "strategy task panicked");
    }

    info!("shutdown complete");
    Ok(())
}
