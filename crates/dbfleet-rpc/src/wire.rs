//! Wire types for the agent RPC protocol.
//!
//! Every agent endpoint answers the same envelope: a [`ResultCode`], a
//! human-readable `result` line, and a `data` array of typed payloads.
//! The control plane switches on the code; `locked` is kept distinct from
//! `error` so a busy entity lock is never mistaken for a failed operation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dbfleet_mysql::ReplAuth;

use crate::error::{RpcError, RpcResult};

// ── Envelope ───────────────────────────────────────────────────────

/// Outcome class of an agent RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultCode {
    /// The operation completed.
    Success,
    /// The operation failed; `result` carries the diagnostic.
    Error,
    /// The entity lock could not be taken within the wait budget.
    Locked,
}

/// The envelope every agent endpoint answers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub resultcode: ResultCode,
    pub result: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl RpcResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            resultcode: ResultCode::Success,
            result: msg.into(),
            data: Vec::new(),
        }
    }

    /// Success carrying one typed payload in `data`.
    pub fn success_with<T: Serialize>(msg: impl Into<String>, payload: &T) -> Self {
        let data = match serde_json::to_value(payload) {
            Ok(value) => vec![value],
            Err(_) => Vec::new(),
        };
        Self {
            resultcode: ResultCode::Success,
            result: msg.into(),
            data,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            resultcode: ResultCode::Error,
            result: msg.into(),
            data: Vec::new(),
        }
    }

    pub fn locked(msg: impl Into<String>) -> Self {
        Self {
            resultcode: ResultCode::Locked,
            result: msg.into(),
            data: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.resultcode == ResultCode::Success
    }

    pub fn is_locked(&self) -> bool {
        self.resultcode == ResultCode::Locked
    }

    /// Decode the first `data` element into a typed payload.
    pub fn first<T: DeserializeOwned>(&self) -> RpcResult<T> {
        let value = self.data.first().cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(RpcError::Payload)
    }
}

// ── Request bodies ─────────────────────────────────────────────────

/// Everything the slave-side bond needs to know about the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterSide {
    pub database_id: u64,
    pub host: String,
    pub port: u16,
    pub repl_user: String,
    pub repl_passwd: String,
    pub file: Option<String>,
    pub position: Option<u64>,
    pub schemas: Vec<String>,
}

impl MasterSide {
    /// Explicit binlog coordinates, when both halves were supplied.
    pub fn coords(&self) -> Option<dbfleet_mysql::BinlogCoords> {
        match (&self.file, self.position) {
            (Some(file), Some(position)) => Some(dbfleet_mysql::BinlogCoords {
                file: file.clone(),
                position,
            }),
            _ => None,
        }
    }

    /// Replication credential as the slave-side `CHANGE MASTER` uses it.
    pub fn repl_auth(&self, source: impl Into<String>) -> ReplAuth {
        ReplAuth {
            user: self.repl_user.clone(),
            passwd: self.repl_passwd.clone(),
            source: source.into(),
        }
    }
}

/// Point a slave entity at a master (`POST .../bond`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondEntity {
    pub master: MasterSide,
    #[serde(default)]
    pub force: bool,
}

/// Tear a slave entity's channel down (`POST .../unbond`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbondEntity {
    pub master_id: u64,
    pub ready: bool,
    pub schemas: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

/// Grant replication from a master entity (`POST .../slave`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveEntity {
    pub auth: ReplAuth,
    /// Whether the caller expects the master to carry schemas. With
    /// schemas expected the binlog must already be on; without, a
    /// binlog-less master is acceptable as-is.
    pub schemas_required: bool,
}

/// Probe whether a slave entity replicates a master (`POST .../ready`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationReady {
    pub master_id: u64,
    pub host: String,
    pub port: u16,
    pub schemas: Vec<String>,
}

/// Drop a replication credential from a master entity (`POST .../revoke`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeEntity {
    pub user: String,
    pub source: String,
}

/// Provision an entity on the agent (`POST /v1/entities/{entity}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntity {
    pub entity: String,
    /// Listen port; 0 lets the agent assign one.
    pub port: u16,
    #[serde(default)]
    pub socket: Option<String>,
    pub user: String,
    pub passwd: String,
    #[serde(default)]
    pub start: bool,
}

/// Remove an entity (`DELETE /v1/entities/{entity}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteEntity {
    #[serde(default)]
    pub force: bool,
}

// ── Response payloads ──────────────────────────────────────────────

/// What the slave-side bond did with the replication channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondOutcome {
    pub channel: String,
    /// Whether the channel threads were started.
    pub started: bool,
}

/// Master-side grant result: where replication should begin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantOutcome {
    pub file: Option<String>,
    pub position: Option<u64>,
    pub schemas: Vec<String>,
}

/// Where a created entity listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAddress {
    pub entity: String,
    pub port: u16,
    pub socket: Option<String>,
}

/// Liveness answer for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityStatus {
    pub entity: String,
    pub running: bool,
    pub port: u16,
}

/// Detail behind a readiness probe verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyProbe {
    pub channel: String,
    pub io_running: bool,
    pub sql_running: bool,
    /// Master schemas the slave has not materialized yet.
    pub missing_schemas: Vec<String>,
}
