use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{
    api::handler::AppState,
    config::AppConfig,
    error::AppResult,
    execution::{RelayerExecutor, SettlementExecutor},
    ledger::{InMemoryLinkStore, LinkStore, PgLinkStore},
    links::LinkService,
    probe::SolanaRpcProbe,
};

pub async fn initialize_app_state(config: &AppConfig) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Link store
    let store: Arc<dyn LinkStore> = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = initialize_database(database_url).await?;
            info!("✅ Postgres link store initialized");
            Arc::new(PgLinkStore::new(pool))
        }
        None => {
            warn!("⚠️  DATABASE_URL not set - using in-memory link store, state is lost on restart");
            Arc::new(InMemoryLinkStore::new())
        }
    };

    // The probe also serves the history scan
    let probe = Arc::new(SolanaRpcProbe::new(
        config.solana_rpc_url.clone(),
        config.probe_timeout(),
    )?);
    info!("✅ Solana ledger probe initialized ({})", config.solana_rpc_url);

    let executor: Arc<dyn SettlementExecutor> = Arc::new(RelayerExecutor::new(
        config.relayer_url.clone(),
        config.settlement_timeout(),
    )?);
    info!("✅ Settlement executor registered: {}", executor.name());

    let links = Arc::new(LinkService::new(
        config,
        store,
        probe.clone(),
        probe,
        executor,
    ));

    let schedule = links.fees().schedule();
    info!(
        "📋 Fee schedule: {} bps, SOL base {} lamports, token base {} units",
        schedule.protocol_fee_bps, schedule.sol_base_fee, schedule.token_base_fee
    );

    spawn_anomaly_monitor(links.clone(), config.anomaly_report_interval());

    Ok(AppState {
        links,
        config: Arc::new(config.clone()),
    })
}

/// Periodically remind operators of payouts still waiting on reconciliation
pub fn spawn_anomaly_monitor(links: Arc<LinkService>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            match links.open_anomaly_count().await {
                Ok(0) => {}
                Ok(count) => warn!(
                    open_anomalies = count,
                    "{} reconciliation anomalies await operator acknowledgement", count
                ),
                Err(e) => error!("Failed to count open anomalies: {:?}", e),
            }
        }
    });
    info!("✅ Anomaly monitor started (every {:?})", interval);
    handle
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 50 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
