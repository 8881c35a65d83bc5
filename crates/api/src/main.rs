use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use persistence::{PgStore, Store};
use tracing::{info, warn};

use webhook_engine_api::app::{build_scheduler, create_app, AppState};
use webhook_engine_api::config::Config;
use webhook_engine_api::jobs::{restore_breakers, save_breakers};
use webhook_engine_api::middleware::{init_metrics, logging::init_logging};
use webhook_engine_api::services::ReqwestTransport;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("failed to load configuration")?;

    init_logging(&config.logging).context("failed to initialize logging")?;
    init_metrics().context("failed to install metrics recorder")?;

    info!("Starting webhook engine v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.database.pool_config()).await?;

    info!("Running database migrations");
    persistence::db::run_migrations(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let transport = ReqwestTransport::new(
        &config.delivery.user_agent,
        config.delivery.response_body_limit,
    )?;
    let addr = config.socket_addr()?;
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);

    let state = AppState::new(config, Arc::clone(&store), Arc::new(transport));

    if let Err(e) = restore_breakers(state.engine.breakers(), store.as_ref()).await {
        warn!(error = %e, "Could not restore circuit breaker state");
    }

    let mut scheduler = build_scheduler(&state, Some(pool));
    scheduler.start();

    let engine = Arc::clone(&state.engine);
    let app = create_app(state);

    info!(%addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("HTTP server stopped, draining background work");
    scheduler.shutdown();
    scheduler.wait_for_shutdown(grace).await;

    if !engine.shutdown(grace).await {
        warn!("Some deliveries were still in flight at shutdown");
    }
    if let Err(e) = save_breakers(engine.breakers(), store.as_ref()).await {
        warn!(error = %e, "Could not persist circuit breaker state");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
