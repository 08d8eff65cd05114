use putzplan::state::{spawn_resident_cleanup, spawn_sync_poll};
use putzplan::{AppState, Config, router};
use std::net::SocketAddr;
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    fs::create_dir_all(&config.data_dir).await?;
    if config.sync_enabled {
        fs::create_dir_all(&config.sync_dir).await?;
    }

    let state = AppState::from_config(&config);
    spawn_resident_cleanup(state.clone(), config.resident_cleanup_interval);
    if let (true, Some(every)) = (config.sync_enabled, config.sync_poll_interval) {
        spawn_sync_poll(state.clone(), every);
    }

    let app = router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!(data_dir = %config.data_dir.display(), "listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !state.flush_now().await {
        warn!("pending changes could not be saved on shutdown");
    }
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
