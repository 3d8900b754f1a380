//! Agent mode — runs on database hosts, fielding control-plane RPCs.
//!
//! In this mode, the daemon:
//! 1. Opens the local entity store
//! 2. Wires engine control to the operator-supplied start/stop commands
//! 3. Serves the entity RPC API over HTTP

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

/// Run a host agent.
pub async fn run_agent(
    port: u16,
    data_dir: PathBuf,
    start_cmd: String,
    stop_cmd: String,
) -> anyhow::Result<()> {
    info!("DbFleet daemon starting in agent mode");
    std::fs::create_dir_all(&data_dir)?;

    // ── Entity store ─────────────────────────────────────────────
    let db_path = data_dir.join("agent.redb");
    let store = dbfleet_agent::EntityStore::open(&db_path)?;
    info!(path = ?db_path, "entity store opened");

    // ── Engine control + local sessions ──────────────────────────
    let control = Arc::new(dbfleet_agent::CommandControl::new(start_cmd, stop_cmd));
    let sessions = Arc::new(dbfleet_mysql::MysqlSessionFactory);
    let state = dbfleet_agent::AgentState::new(store, control, sessions);

    // ── RPC server ───────────────────────────────────────────────

    let router = dbfleet_agent::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "agent RPC starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
    });

    server.await?;

    info!("DbFleet agent stopped");
    Ok(())
}
