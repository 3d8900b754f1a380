//! Fleet topology configuration (`fleet.toml`).

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Control-plane view of the fleet: the agents it may place databases on
/// and how long a single operation may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub agents: Vec<AgentEntry>,

    /// Wall-clock budget for one control-plane operation, in seconds.
    #[serde(default = "default_op_budget_secs")]
    pub op_budget_secs: u64,
}

/// One agent host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    pub addr: String,
}

fn default_op_budget_secs() -> u64 {
    30
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Agent id/addr pairs, in the shape the manager's directory takes.
    pub fn agent_pairs(&self) -> Vec<(String, String)> {
        self.agents
            .iter()
            .map(|a| (a.id.clone(), a.addr.clone()))
            .collect()
    }
}
