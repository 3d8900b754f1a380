//! Provisioning backends.
//!
//! A backend turns "give me a database instance" into something concrete:
//! an entity on a fleet agent, or a claim on an externally managed server.
//! Creation and deletion are two-phase: `prepare_*` does the remote or
//! reservation work and answers an opaque token, the saga writes the
//! catalog, then `commit`/`abort` finalizes or undoes the prepared work.
//! Abort is re-runnable; a saga may call it after any partial failure.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use dbfleet_catalog::{BackendKind, CatalogStore, DatabaseId, DatabaseInstance};
use dbfleet_mysql::ReplicaChannel;
use dbfleet_rpc::client::{AgentCall, Deadline};
use dbfleet_rpc::wire::{CreateEntity, DeleteEntity, EntityAddress, EntityStatus};

use crate::error::{envelope_engine, ManagerError, ManagerResult};

/// What a create saga asks a backend for.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub database_id: DatabaseId,
    pub dbtype: String,
    /// Administrative credential the new engine is created with.
    pub user: String,
    pub passwd: String,
    /// Placement hint: agent id for the local-agent backend.
    pub agent: Option<String>,
    /// Placement hint: zone for the static-record backend.
    pub zone: Option<String>,
    /// Requested listen port; None lets the backend pick.
    pub port: Option<u16>,
}

/// Answer of a successful `prepare_create`.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub host: String,
    pub port: u16,
    /// Backend-scoped locator persisted on the instance row.
    pub locator: String,
    /// Opaque token for `commit`/`abort`.
    pub token: String,
}

/// Process state of an instance, as the backend sees it.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealth {
    pub running: bool,
    pub channels: Vec<ReplicaChannel>,
}

/// Two-phase provisioning plus lifecycle forwarding.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    async fn prepare_create(&self, spec: &CreateSpec, deadline: Deadline)
    -> ManagerResult<Prepared>;

    /// Finalize prepared work. For deletes this is the actual teardown.
    async fn commit(&self, token: &str, deadline: Deadline) -> ManagerResult<()>;

    /// Undo prepared work. Safe to repeat and safe after a failed commit.
    async fn abort(&self, token: &str, deadline: Deadline) -> ManagerResult<()>;

    /// Validate a delete and answer the token that will tear it down.
    async fn prepare_delete(
        &self,
        inst: &DatabaseInstance,
        force: bool,
        deadline: Deadline,
    ) -> ManagerResult<String>;

    async fn start(&self, inst: &DatabaseInstance, deadline: Deadline) -> ManagerResult<()>;

    async fn stop(&self, inst: &DatabaseInstance, deadline: Deadline) -> ManagerResult<()>;

    async fn status(
        &self,
        inst: &DatabaseInstance,
        deadline: Deadline,
    ) -> ManagerResult<InstanceHealth>;
}

impl std::fmt::Debug for dyn ProvisioningBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ProvisioningBackend")
    }
}

// ── Agent directory ────────────────────────────────────────────────

/// Resolves agent ids to RPC addresses.
pub trait AgentDirectory: Send + Sync {
    fn agent_addr(&self, agent_id: &str) -> Option<String>;
}

/// Directory backed by the fleet configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    agents: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            agents: pairs.into_iter().collect(),
        }
    }
}

impl AgentDirectory for StaticDirectory {
    fn agent_addr(&self, agent_id: &str) -> Option<String> {
        self.agents.get(agent_id).cloned()
    }
}

// ── Locators ───────────────────────────────────────────────────────

/// Entity name an instance carries on its agent.
pub fn entity_for(database_id: DatabaseId) -> String {
    database_id.to_string()
}

pub fn locator(agent_id: &str, entity: &str) -> String {
    format!("{agent_id}/{entity}")
}

/// Split an `agent_id/entity` locator.
pub fn split_locator(locator: &str) -> Option<(&str, &str)> {
    locator.split_once('/')
}

fn host_of(addr: &str) -> String {
    match addr.rsplit_once(':') {
        Some((host, _)) => host.to_string(),
        None => addr.to_string(),
    }
}

// ── Local agent backend ────────────────────────────────────────────

/// Provisions entities on fleet agents over the agent RPC surface.
pub struct LocalAgentBackend {
    agents: Arc<dyn AgentCall>,
    directory: Arc<dyn AgentDirectory>,
}

impl LocalAgentBackend {
    pub fn new(agents: Arc<dyn AgentCall>, directory: Arc<dyn AgentDirectory>) -> Self {
        Self { agents, directory }
    }

    fn resolve(&self, locator: &str) -> ManagerResult<(String, String)> {
        let Some((agent_id, entity)) = split_locator(locator) else {
            return Err(ManagerError::Unacceptable(format!(
                "malformed locator: {locator}"
            )));
        };
        let Some(addr) = self.directory.agent_addr(agent_id) else {
            return Err(ManagerError::Unacceptable(format!(
                "agent {agent_id} not registered"
            )));
        };
        Ok((addr, entity.to_string()))
    }
}

#[async_trait]
impl ProvisioningBackend for LocalAgentBackend {
    async fn prepare_create(
        &self,
        spec: &CreateSpec,
        deadline: Deadline,
    ) -> ManagerResult<Prepared> {
        let Some(agent_id) = spec.agent.as_deref() else {
            return Err(ManagerError::Acceptable(
                "agent id required for the local-agent backend".to_string(),
            ));
        };
        let Some(addr) = self.directory.agent_addr(agent_id) else {
            return Err(ManagerError::Acceptable(format!(
                "agent {agent_id} not registered"
            )));
        };
        let entity = entity_for(spec.database_id);
        let req = CreateEntity {
            entity: entity.clone(),
            port: spec.port.unwrap_or(0),
            socket: None,
            user: spec.user.clone(),
            passwd: spec.passwd.clone(),
            start: true,
        };
        let resp = self
            .agents
            .create_entity(&addr, &entity, &req, deadline)
            .await?;
        let resp = envelope_engine(resp)?;
        let address: EntityAddress = resp.first()?;
        let locator = locator(agent_id, &entity);
        debug!(%locator, port = address.port, "entity prepared");
        Ok(Prepared {
            host: host_of(&addr),
            port: address.port,
            token: format!("create:{locator}"),
            locator,
        })
    }

    async fn commit(&self, token: &str, deadline: Deadline) -> ManagerResult<()> {
        match token.split_once(':') {
            // Create leaves nothing pending: the entity already runs.
            Some(("create", _)) => Ok(()),
            Some(("delete", rest)) => {
                let Some((locator, force)) = rest.rsplit_once(':') else {
                    return Err(ManagerError::Unacceptable(format!(
                        "malformed delete token: {token}"
                    )));
                };
                let (addr, entity) = self.resolve(locator)?;
                let req = DeleteEntity {
                    force: force == "true",
                };
                let resp = self
                    .agents
                    .delete_entity(&addr, &entity, &req, deadline)
                    .await?;
                envelope_engine(resp)?;
                info!(%locator, "entity deleted");
                Ok(())
            }
            _ => Err(ManagerError::Unacceptable(format!(
                "malformed token: {token}"
            ))),
        }
    }

    async fn abort(&self, token: &str, deadline: Deadline) -> ManagerResult<()> {
        match token.split_once(':') {
            Some(("create", locator)) => {
                // The agent answers success for an absent entity, so a
                // repeated abort converges.
                let (addr, entity) = self.resolve(locator)?;
                let req = DeleteEntity { force: true };
                let resp = self
                    .agents
                    .delete_entity(&addr, &entity, &req, deadline)
                    .await?;
                envelope_engine(resp)?;
                info!(%locator, "prepared entity removed");
                Ok(())
            }
            Some(("delete", _)) => Ok(()),
            _ => Err(ManagerError::Unacceptable(format!(
                "malformed token: {token}"
            ))),
        }
    }

    async fn prepare_delete(
        &self,
        inst: &DatabaseInstance,
        force: bool,
        deadline: Deadline,
    ) -> ManagerResult<String> {
        let (addr, entity) = self.resolve(&inst.locator)?;
        let resp = self.agents.status_entity(&addr, &entity, deadline).await?;
        let resp = envelope_engine(resp)?;
        let status: EntityStatus = resp.first()?;
        if status.running && !force {
            return Err(ManagerError::Acceptable(format!(
                "database {} is running; delete needs force",
                inst.database_id
            )));
        }
        Ok(format!("delete:{}:{force}", inst.locator))
    }

    async fn start(&self, inst: &DatabaseInstance, deadline: Deadline) -> ManagerResult<()> {
        let (addr, entity) = self.resolve(&inst.locator)?;
        let resp = self.agents.start_entity(&addr, &entity, deadline).await?;
        envelope_engine(resp)?;
        Ok(())
    }

    async fn stop(&self, inst: &DatabaseInstance, deadline: Deadline) -> ManagerResult<()> {
        let (addr, entity) = self.resolve(&inst.locator)?;
        let resp = self.agents.stop_entity(&addr, &entity, deadline).await?;
        envelope_engine(resp)?;
        Ok(())
    }

    async fn status(
        &self,
        inst: &DatabaseInstance,
        deadline: Deadline,
    ) -> ManagerResult<InstanceHealth> {
        let (addr, entity) = self.resolve(&inst.locator)?;
        let resp = self.agents.status_entity(&addr, &entity, deadline).await?;
        let resp = envelope_engine(resp)?;
        let status: EntityStatus = resp.first()?;
        // Entries after the status payload are replica channels.
        let channels = resp
            .data
            .iter()
            .skip(1)
            .filter_map(|value| serde_json::from_value(value.clone()).ok())
            .collect();
        Ok(InstanceHealth {
            running: status.running,
            channels,
        })
    }
}

// ── Static record backend ──────────────────────────────────────────

/// Hands out externally managed servers registered as static records.
/// Prepare reserves a free record, commit binds it to the instance, abort
/// releases the reservation; deletion releases the binding.
pub struct StaticRecordBackend {
    catalog: CatalogStore,
}

impl StaticRecordBackend {
    pub fn new(catalog: CatalogStore) -> Self {
        Self { catalog }
    }

    fn parse_token<'t>(&self, token: &'t str) -> ManagerResult<(&'t str, u64, DatabaseId)> {
        let parts: Vec<&str> = token.splitn(3, ':').collect();
        if let [verb, record, database] = parts.as_slice() {
            if let (Ok(record_id), Ok(database_id)) = (record.parse(), database.parse()) {
                return Ok((verb, record_id, database_id));
            }
        }
        Err(ManagerError::Unacceptable(format!(
            "malformed token: {token}"
        )))
    }

    fn release(&self, record_id: u64, database_id: DatabaseId) -> ManagerResult<()> {
        let txn = self.catalog.write()?;
        if let Some(mut record) = txn.static_record(record_id)? {
            let ours = record.database_id.is_none() || record.database_id == Some(database_id);
            if ours {
                record.reserved = false;
                record.database_id = None;
                txn.put_static_record(&record)?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningBackend for StaticRecordBackend {
    async fn prepare_create(
        &self,
        spec: &CreateSpec,
        _deadline: Deadline,
    ) -> ManagerResult<Prepared> {
        let zone = spec.zone.as_deref().unwrap_or("all");
        let txn = self.catalog.write()?;
        let free = txn.free_static_records(zone)?;
        let Some(mut record) = free.into_iter().next() else {
            return Err(ManagerError::Acceptable(format!(
                "no free static record in zone {zone}"
            )));
        };
        record.reserved = true;
        txn.put_static_record(&record)?;
        txn.commit()?;
        info!(record_id = record.record_id, %zone, "static record reserved");
        Ok(Prepared {
            host: record.host.clone(),
            port: record.port,
            locator: format!("record/{}", record.record_id),
            token: format!("bind:{}:{}", record.record_id, spec.database_id),
        })
    }

    async fn commit(&self, token: &str, _deadline: Deadline) -> ManagerResult<()> {
        let (verb, record_id, database_id) = self.parse_token(token)?;
        match verb {
            "bind" => {
                let txn = self.catalog.write()?;
                let Some(mut record) = txn.static_record(record_id)? else {
                    return Err(ManagerError::Unacceptable(format!(
                        "static record {record_id} vanished before bind"
                    )));
                };
                record.reserved = false;
                record.database_id = Some(database_id);
                txn.put_static_record(&record)?;
                txn.commit()?;
                Ok(())
            }
            "release" => self.release(record_id, database_id),
            _ => Err(ManagerError::Unacceptable(format!(
                "malformed token: {token}"
            ))),
        }
    }

    async fn abort(&self, token: &str, _deadline: Deadline) -> ManagerResult<()> {
        let (verb, record_id, database_id) = self.parse_token(token)?;
        match verb {
            "bind" => self.release(record_id, database_id),
            "release" => Ok(()),
            _ => Err(ManagerError::Unacceptable(format!(
                "malformed token: {token}"
            ))),
        }
    }

    async fn prepare_delete(
        &self,
        inst: &DatabaseInstance,
        _force: bool,
        _deadline: Deadline,
    ) -> ManagerResult<String> {
        let Some(record_id) = inst
            .locator
            .strip_prefix("record/")
            .and_then(|id| id.parse::<u64>().ok())
        else {
            return Err(ManagerError::Unacceptable(format!(
                "malformed locator: {}",
                inst.locator
            )));
        };
        Ok(format!("release:{record_id}:{}", inst.database_id))
    }

    async fn start(&self, inst: &DatabaseInstance, _deadline: Deadline) -> ManagerResult<()> {
        Err(ManagerError::Acceptable(format!(
            "database {} is externally managed",
            inst.database_id
        )))
    }

    async fn stop(&self, inst: &DatabaseInstance, _deadline: Deadline) -> ManagerResult<()> {
        Err(ManagerError::Acceptable(format!(
            "database {} is externally managed",
            inst.database_id
        )))
    }

    async fn status(
        &self,
        inst: &DatabaseInstance,
        _deadline: Deadline,
    ) -> ManagerResult<InstanceHealth> {
        let record_id = inst
            .locator
            .strip_prefix("record/")
            .and_then(|id| id.parse::<u64>().ok());
        let running = match record_id {
            Some(record_id) => self
                .catalog
                .get_static_record(record_id)?
                .map(|record| record.database_id == Some(inst.database_id))
                .unwrap_or(false),
            None => false,
        };
        Ok(InstanceHealth {
            running,
            channels: Vec::new(),
        })
    }
}

// ── Registry ───────────────────────────────────────────────────────

/// Lazily built backends, one per kind, shared across sagas.
pub struct BackendRegistry {
    catalog: CatalogStore,
    agents: Arc<dyn AgentCall>,
    directory: Arc<dyn AgentDirectory>,
    inner: RwLock<HashMap<BackendKind, Arc<dyn ProvisioningBackend>>>,
}

impl BackendRegistry {
    pub fn new(
        catalog: CatalogStore,
        agents: Arc<dyn AgentCall>,
        directory: Arc<dyn AgentDirectory>,
    ) -> Self {
        Self {
            catalog,
            agents,
            directory,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Get or build the backend for a kind. Double-checked: the read lock
    /// answers the common case, the write lock re-checks before building.
    pub fn get(&self, kind: BackendKind) -> ManagerResult<Arc<dyn ProvisioningBackend>> {
        {
            let guard = match self.inner.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(backend) = guard.get(&kind) {
                return Ok(backend.clone());
            }
        }
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(backend) = guard.get(&kind) {
            return Ok(backend.clone());
        }
        let built: Arc<dyn ProvisioningBackend> = match kind {
            BackendKind::LocalAgent => Arc::new(LocalAgentBackend::new(
                self.agents.clone(),
                self.directory.clone(),
            )),
            BackendKind::StaticRecord => {
                Arc::new(StaticRecordBackend::new(self.catalog.clone()))
            }
            BackendKind::Cloud => {
                return Err(ManagerError::Acceptable(
                    "cloud backend not configured".to_string(),
                ));
            }
        };
        guard.insert(kind, built.clone());
        debug!(%kind, "backend built");
        Ok(built)
    }
}

/// Best-effort abort used on saga unwind paths. Failures are logged, never
/// propagated over the original error.
pub(crate) async fn abort_quietly(
    backend: &Arc<dyn ProvisioningBackend>,
    token: &str,
    deadline: Deadline,
) {
    if let Err(err) = backend.abort(token, deadline).await {
        warn!(%token, error = %err, "abort failed; prepared work may need manual cleanup");
    }
}
