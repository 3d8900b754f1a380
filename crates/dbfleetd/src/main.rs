//! dbfleetd — the DbFleet daemon.
//!
//! Single binary with two modes:
//! - `control-plane`: catalog, database manager, task worker, REST API
//! - `agent`: per-host entity store and engine control RPC surface
//!
//! # Usage
//!
//! ```text
//! dbfleetd control-plane --port 8360 --data-dir /var/lib/dbfleet \
//!     --fleet-config /etc/dbfleet/fleet.toml
//! dbfleetd agent --port 7700 --data-dir /var/lib/dbfleet-agent \
//!     --start-cmd "systemctl start mysql@{port}" \
//!     --stop-cmd "systemctl stop mysql@{port}"
//! ```

mod agent_mode;
mod config;
mod control_plane;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dbfleetd", about = "DbFleet daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane (catalog, manager, task worker, REST API).
    ControlPlane {
        /// Port for the REST API.
        #[arg(long, default_value = "8360")]
        port: u16,

        /// Data directory for the catalog.
        #[arg(long, default_value = "/var/lib/dbfleet")]
        data_dir: PathBuf,

        /// Fleet topology file.
        #[arg(long, default_value = "/etc/dbfleet/fleet.toml")]
        fleet_config: PathBuf,

        /// Per-operation budget in seconds; overrides the fleet config.
        #[arg(long)]
        op_budget: Option<u64>,

        /// Task worker poll interval in seconds.
        #[arg(long, default_value = "2")]
        task_poll: u64,
    },

    /// Run a host agent (entity store + engine control RPC surface).
    Agent {
        /// Port for the agent RPC API.
        #[arg(long, default_value = "7700")]
        port: u16,

        /// Data directory for the entity store.
        #[arg(long, default_value = "/var/lib/dbfleet-agent")]
        data_dir: PathBuf,

        /// Engine start command; `{entity}`, `{port}` and `{socket}` expand.
        #[arg(long)]
        start_cmd: String,

        /// Engine stop command; `{entity}`, `{port}` and `{socket}` expand.
        #[arg(long)]
        stop_cmd: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dbfleetd=debug,dbfleet=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::ControlPlane {
            port,
            data_dir,
            fleet_config,
            op_budget,
            task_poll,
        } => {
            control_plane::run_control_plane(port, data_dir, fleet_config, op_budget, task_poll)
                .await
        }
        Command::Agent {
            port,
            data_dir,
            start_cmd,
            stop_cmd,
        } => agent_mode::run_agent(port, data_dir, start_cmd, stop_cmd).await,
    }
}
