use std::net::SocketAddr;

use anyhow::Context;
use mimalloc::MiMalloc;
use scanqueue::config::AppConfig;
use scanqueue::services::reaper;
use scanqueue::{db, routes, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// M-MIMALLOC-APP: Use mimalloc as global allocator for improved performance.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanqueue=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = AppConfig::from_env().context("DATABASE_URL must be set")?;

    let pool = db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let _reaper = reaper::spawn(pool.clone(), config.queue.clone());

    let ip: std::net::IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid BACKEND_HOST: {}", config.host))?;
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!(
        host = %addr,
        max_attempts = config.queue.max_attempts,
        lease_timeout_secs = config.queue.lease_timeout.as_secs(),
        retry_priority = ?config.queue.retry_priority,
        safe_file_default_scope = ?config.safe_file_default_scope,
        "Starting scan queue API server"
    );

    let app = routes::router(AppState { db: pool, config });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
