use anyhow::Context;
use chatswarm::bot::ClearanceSource;
use chatswarm::clearance::{ClearanceService, ClearanceState, HttpSolver, Solver};
use chatswarm::config::Settings;
use chatswarm::follow::{spawn_workers, FollowQueue};
use chatswarm::registry::TenantRegistry;
use chatswarm::storage::{MemoryStorage, Storage};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_logging();

    info!("Starting chatswarm...");

    let settings = Settings::new().context("failed to load configuration")?;
    info!("Configuration loaded successfully.");

    let solver_url = settings
        .solver_url
        .clone()
        .context("SOLVER_URL must be configured")?;

    // Persistence backends plug in behind the Storage trait; the default
    // wiring keeps everything in memory.
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());

    let clearance_state = Arc::new(ClearanceState::new(&settings.bootstrap_user_agent));
    let solver: Arc<dyn Solver> = Arc::new(HttpSolver::new(
        solver_url,
        settings.solver_api_key.clone(),
        settings.platform_base_url.clone(),
        settings.bootstrap_user_agent.clone(),
    )?);

    let shutdown = CancellationToken::new();
    let clearance_task = tokio::spawn(
        Arc::new(ClearanceService::new(clearance_state.clone(), solver)).run(shutdown.clone()),
    );

    let registry = Arc::new(TenantRegistry::new(
        storage.clone(),
        ClearanceSource::Shared(clearance_state),
        settings.platform_base_url.clone(),
    ));
    let queue = Arc::new(FollowQueue::new());
    let workers = spawn_workers(
        queue.clone(),
        storage,
        settings.follow_workers,
        shutdown.clone(),
    );
    info!(workers = workers.len(), "follow worker pool started");

    // The admin/app control surface mounts on `registry` and `queue` here;
    // it is not part of this crate.
    info!("chatswarm is running.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!(
        tenants = registry.len().await,
        queued = queue.len().await,
        "Shutting down..."
    );
    shutdown.cancel();
    clearance_task.await.ok();
    futures_util::future::join_all(workers).await;

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
