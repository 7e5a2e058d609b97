use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remit_core::breaker::BreakerRegistry;
use remit_core::clients::HttpAccountClient;
use remit_core::config::Config;
use remit_core::events::redis::RedisEventPublisher;
use remit_core::ledger::PostgresLedger;
use remit_core::services::TransferService;
use remit_core::{create_app, startup, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let report = startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.is_valid() {
        tracing::warn!("startup validation reported failures, continuing anyway");
    }

    let registry = Arc::new(BreakerRegistry::new(config.breaker_config()));
    let accounts = HttpAccountClient::new(config.accounts_service_url.clone(), registry.clone())?;
    tracing::info!(
        url = %config.accounts_service_url,
        "Accounts service client initialized"
    );

    let publisher = RedisEventPublisher::new(&config.redis_url)
        .map_err(|e| anyhow::anyhow!("Failed to initialize event publisher: {e}"))?;

    let transfers = Arc::new(TransferService::new(
        Arc::new(PostgresLedger::new(pool.clone())),
        Arc::new(accounts),
        Arc::new(publisher),
    ));

    let app = create_app(AppState {
        transfers,
        breakers: registry,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
