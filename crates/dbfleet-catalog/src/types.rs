//! Domain types for the DbFleet catalog.
//!
//! These types represent the persisted state of database instances, their
//! schemas, replication relations, consumer quotes, static host records,
//! and control-plane tasks. All types are serializable to/from JSON for
//! storage in redb tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier for a database instance.
pub type DatabaseId = u64;

/// Unique identifier for a schema row.
pub type SchemaId = u64;

/// Unique identifier for a consumer quote.
pub type QuoteId = u64;

/// Unique identifier for a static host record.
pub type RecordId = u64;

/// Unique identifier for a control-plane task.
pub type TaskId = u64;

// ── Database instances ─────────────────────────────────────────────

/// Which provisioning backend owns an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Provisioned through an instance control agent on a fleet host.
    LocalAgent,
    /// An externally managed server registered as a static record.
    StaticRecord,
    /// A cloud provider instance (no provider shipped in this build).
    Cloud,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::LocalAgent => "local-agent",
            BackendKind::StaticRecord => "static-record",
            BackendKind::Cloud => "cloud",
        };
        f.write_str(s)
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-agent" => Ok(BackendKind::LocalAgent),
            "static-record" => Ok(BackendKind::StaticRecord),
            "cloud" => Ok(BackendKind::Cloud),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

/// Replication role of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    Master,
    Slave,
}

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Provisioned but not yet confirmed serving.
    Unactive,
    /// Confirmed serving.
    Ok,
}

/// A tracked database instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseInstance {
    pub database_id: DatabaseId,
    pub backend: BackendKind,
    /// Engine type, e.g. "mysql".
    pub dbtype: String,
    pub dbversion: Option<String>,
    /// Backend-scoped provisioning locator; unique per backend.
    pub locator: String,
    /// Serving address, filled in by the backend.
    pub host: String,
    pub port: u16,
    /// Administrative credential. A missing password marks the instance
    /// unmanageable: the control plane may report it but not operate it.
    pub user: String,
    pub passwd: Option<String>,
    pub status: InstanceStatus,
    pub role: InstanceRole,
    /// Maximum number of master links a slave may hold. Zero for masters.
    pub slave_capacity: u32,
    pub desc: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DatabaseInstance {
    /// Whether the control plane holds a credential for this instance.
    pub fn manageable(&self) -> bool {
        self.passwd.is_some()
    }
}

// ── Replication relations ──────────────────────────────────────────

/// One master/slave link. At most one row exists per pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlaveRelation {
    pub master_id: DatabaseId,
    pub slave_id: DatabaseId,
    /// False until the replication channel is verified caught up. Flips to
    /// true exactly once; the row is deleted on unbond.
    pub ready: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SlaveRelation {
    pub fn table_key(&self) -> (u64, u64) {
        (self.master_id, self.slave_id)
    }
}

// ── Schemas ────────────────────────────────────────────────────────

/// A schema hosted on a master instance, with its access credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaRecord {
    pub schema_id: SchemaId,
    /// Owning master instance.
    pub database_id: DatabaseId,
    pub name: String,
    /// Read-write credential (ALL privileges on the schema).
    pub user: String,
    pub passwd: String,
    /// Read-only credential (SELECT).
    pub ro_user: String,
    pub ro_passwd: String,
    /// Grant source hosts, default `%`.
    pub source: String,
    pub rosource: String,
    pub character_set: Option<String>,
    pub collation: Option<String>,
    pub created_at: u64,
}

impl SchemaRecord {
    pub fn table_key(&self) -> (u64, &str) {
        (self.database_id, self.name.as_str())
    }
}

// ── Quotes ─────────────────────────────────────────────────────────

/// A consumer's claim on a schema. The referenced serving instance cannot
/// be deleted while the quote exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaQuote {
    pub quote_id: QuoteId,
    pub schema_id: SchemaId,
    /// Master instance owning the schema.
    pub database_id: DatabaseId,
    /// Instance actually serving this consumer: the master itself, or a
    /// ready slave for read-only quotes.
    pub qdatabase_id: DatabaseId,
    pub entity: String,
    pub endpoint: String,
    pub desc: Option<String>,
    pub created_at: u64,
}

// ── Static host records ────────────────────────────────────────────

/// An externally managed server the static-record backend may hand out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticRecord {
    pub record_id: RecordId,
    pub zone: String,
    pub host: String,
    pub port: u16,
    /// Claimed by an in-flight create saga.
    pub reserved: bool,
    /// Bound instance once a create saga commits.
    pub database_id: Option<DatabaseId>,
    pub extinfo: Option<serde_json::Value>,
}

// ── Control-plane tasks ────────────────────────────────────────────

/// What a task does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskKind {
    /// Poll a freshly provisioned instance until it serves, flip its status
    /// to Ok, then complete the optional create-time bond.
    ConfirmCreate {
        database_id: DatabaseId,
        bond: Option<DatabaseId>,
    },
}

/// Task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// A persisted unit of asynchronous control-plane work. Survives restarts;
/// the task worker resumes anything still pending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetTask {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Epoch seconds before which the worker must not pick this task up.
    pub not_before: u64,
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Current time as epoch seconds.
pub fn epoch_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
