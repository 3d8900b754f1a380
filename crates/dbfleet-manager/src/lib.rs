//! Fleet control plane: lifecycle sagas, replication coordination, and
//! provisioning backends over the shared catalog.

pub mod backend;
pub mod error;
pub mod manager;
pub mod replication;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    AgentDirectory, BackendRegistry, CreateSpec, InstanceHealth, Prepared, ProvisioningBackend,
    StaticDirectory,
};
pub use error::{ManagerError, ManagerResult};
pub use manager::{
    CreateDatabaseRequest, CreateQuoteRequest, CreateSchemaRequest, DatabaseDetail,
    DatabaseManager, DatabaseSummary, ListFilter, QuoteGrant, SchemaAuth,
};
pub use replication::{BondRequest, ReplicationCoordinator};
pub use tasks::TaskWorker;
