//! `hubq serve` – run the orchestrator until interrupted.

use anyhow::{Context, Result};
use hubq_core::auth::JwtAuthorizer;
use hubq_core::config::HubqConfig;
use hubq_core::logging;
use hubq_core::store::SqliteJobStore;
use hubq_core::transfer::HubCliFetcher;
use hubq_core::Orchestrator;
use std::path::Path;
use std::sync::Arc;

use crate::cli::control_socket;

pub async fn run_serve(cfg: &HubqConfig, socket: &Path) -> Result<()> {
    let secret = cfg
        .jwt_secret
        .as_deref()
        .context("no token secret configured (set JWT_SECRET or jwt_secret in config.toml)")?;
    let authorizer = Arc::new(JwtAuthorizer::new(secret));

    let store = Arc::new(SqliteJobStore::open_default().await?);
    let mut fetcher = HubCliFetcher::from_config(cfg);
    match logging::job_log_dir() {
        Ok(dir) => fetcher = fetcher.with_log_dir(dir),
        Err(e) => tracing::warn!("per-job logs disabled: {e:#}"),
    }

    let orchestrator = Orchestrator::start(cfg, store, Arc::new(fetcher), authorizer).await?;
    let listener = control_socket::spawn_control_listener(orchestrator.gateway(), socket)?;
    tracing::info!(
        max_concurrent = cfg.max_concurrent_downloads,
        models_dir = %cfg.models_dir.display(),
        "hubq serving"
    );
    println!("hubq serving on {}", socket.display());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    tracing::info!("interrupt received, shutting down");

    listener.abort();
    let shutdown = orchestrator.shutdown().await;
    if let Err(e) = std::fs::remove_file(socket) {
        tracing::debug!("removing control socket: {e}");
    }
    shutdown?;
    Ok(())
}
