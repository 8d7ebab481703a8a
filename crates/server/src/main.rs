use std::path::PathBuf;

use anyhow::Context;
use artsync_server::config::{self, DEFAULT_CONFIG_DIR};
use artsync_server::state::AppState;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir: PathBuf = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string())
        .into();
    let config = config::load(&config_dir)
        .with_context(|| format!("failed to load configuration from {}", config_dir.display()))?;

    // RUST_LOG wins over Logging.Level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.directive().into()),
        )
        .init();

    for warning in &config.warnings {
        warn!("{warning}");
    }
    config.log_summary();

    let db_path = config.server.data_dir.join("artsync.db");
    info!(db_path = %db_path.display(), "connecting to database");
    let pool = artsync_db::connect(&db_path.to_string_lossy())
        .await
        .context("failed to connect to database")?;
    let applied = artsync_db::migrate::run(&pool)
        .await
        .context("failed to run migrations")?;
    info!(applied = applied.len(), "migrations complete");

    let config = config::bootstrap_user_id(config)
        .await
        .context("failed to discover media server user id")?;

    let state = AppState::from_config(config, pool).await?;
    state.notifier.app_started();

    if state.config.auto_download.enabled {
        artsync_server::autodownload::spawn_scheduler(state.clone());
    }

    let bind_addr = state.config.server.bind.clone();
    let app = artsync_server::routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
