//! Control plane mode — runs the catalog, the database manager, the
//! task worker, and the REST API.
//!
//! In this mode, the daemon:
//! 1. Opens the fleet catalog
//! 2. Loads the agent directory from `fleet.toml`
//! 3. Runs the task worker, resuming tasks left over from a previous run
//! 4. Serves the REST API over HTTP

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::config::FleetConfig;

/// Run the control plane.
pub async fn run_control_plane(
    port: u16,
    data_dir: PathBuf,
    fleet_config: PathBuf,
    op_budget: Option<u64>,
    task_poll: u64,
) -> anyhow::Result<()> {
    info!("DbFleet daemon starting in control-plane mode");
    std::fs::create_dir_all(&data_dir)?;

    let fleet = FleetConfig::from_file(&fleet_config)?;
    let budget = Duration::from_secs(op_budget.unwrap_or(fleet.op_budget_secs));
    info!(
        agents = fleet.agents.len(),
        budget_secs = budget.as_secs(),
        "fleet config loaded"
    );

    // ── Catalog ──────────────────────────────────────────────────
    let db_path = data_dir.join("dbfleet.redb");
    let catalog = dbfleet_catalog::CatalogStore::open(&db_path)?;
    info!(path = ?db_path, "catalog opened");

    // ── Manager over the configured agents ───────────────────────
    let directory = Arc::new(dbfleet_manager::StaticDirectory::new(fleet.agent_pairs()));
    let agents = Arc::new(dbfleet_rpc::AgentClient::new());
    let sessions = Arc::new(dbfleet_mysql::MysqlSessionFactory);
    let manager = Arc::new(dbfleet_manager::DatabaseManager::new(
        catalog, agents, directory, sessions, budget,
    ));
    info!("database manager initialized");

    // ── Shutdown signal ──────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_shutdown = shutdown_rx.clone();

    // ── Task worker ──────────────────────────────────────────────

    // Re-drives tasks that were pending or mid-flight when the last
    // process stopped.
    let worker = dbfleet_manager::TaskWorker::new(manager.clone());
    let worker_handle = tokio::spawn(async move {
        worker
            .run(Duration::from_secs(task_poll), worker_shutdown)
            .await;
    });

    // ── REST API ─────────────────────────────────────────────────

    let router = dbfleet_api::build_router(manager);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "REST API starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = worker_handle.await;

    info!("DbFleet control plane stopped");
    Ok(())
}
