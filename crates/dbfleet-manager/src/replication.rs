//! Replication coordination: bond, grant, readiness, unbond.
//!
//! Each operation runs preflight checks against a catalog read snapshot,
//! drives the remote agent, then re-validates inside a catalog write
//! transaction before touching rows. The write side serializes on the
//! catalog's single writer, which is what makes the capacity limit hold
//! under concurrent bonds. An RPC or precondition failure leaves the
//! catalog untouched.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use dbfleet_catalog::{
    epoch_secs, BackendKind, CatalogStore, DatabaseId, DatabaseInstance, InstanceRole,
    InstanceStatus, SlaveRelation,
};
use dbfleet_mysql::replication_user;
use dbfleet_rpc::client::{AgentCall, Deadline};
use dbfleet_rpc::wire::{
    GrantOutcome, MasterSide, ReplicationReady, RevokeEntity, SlaveEntity, UnbondEntity,
};
use serde::{Deserialize, Serialize};

use crate::backend::{split_locator, AgentDirectory};
use crate::error::{envelope_client, envelope_engine, ManagerError, ManagerResult};

/// Everything Bond needs to know about the master side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondRequest {
    pub master_id: DatabaseId,
    pub host: String,
    pub port: u16,
    pub repl_user: String,
    pub repl_passwd: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub position: Option<u64>,
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

/// The instance must exist, whatever else is wrong with it.
pub(crate) fn require_database(
    catalog: &CatalogStore,
    database_id: DatabaseId,
) -> ManagerResult<DatabaseInstance> {
    catalog
        .get_database(database_id)?
        .ok_or_else(|| ManagerError::NotFound(format!("database {database_id} not found")))
}

/// Generated slave credential: `repl-` plus six random lowercase letters.
fn repl_password() -> ManagerResult<String> {
    let mut buf = [0u8; 6];
    getrandom::getrandom(&mut buf).map_err(|err| {
        ManagerError::Unacceptable(format!("credential generation failed: {err}"))
    })?;
    let suffix: String = buf.iter().map(|b| char::from(b'a' + (b % 26))).collect();
    Ok(format!("repl-{suffix}"))
}

/// Drives the master/slave bonding protocol across agents and the catalog.
pub struct ReplicationCoordinator {
    catalog: CatalogStore,
    agents: Arc<dyn AgentCall>,
    directory: Arc<dyn AgentDirectory>,
    budget: Duration,
}

impl ReplicationCoordinator {
    pub fn new(
        catalog: CatalogStore,
        agents: Arc<dyn AgentCall>,
        directory: Arc<dyn AgentDirectory>,
        budget: Duration,
    ) -> Self {
        Self {
            catalog,
            agents,
            directory,
            budget,
        }
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.budget)
    }

    /// RPC route for an instance. Only local-agent instances have one.
    fn agent_route(&self, inst: &DatabaseInstance) -> ManagerResult<(String, String)> {
        if inst.backend != BackendKind::LocalAgent {
            return Err(ManagerError::Unacceptable(format!(
                "database {} has no control agent (backend {})",
                inst.database_id, inst.backend
            )));
        }
        let Some((agent_id, entity)) = split_locator(&inst.locator) else {
            return Err(ManagerError::Unacceptable(format!(
                "malformed locator: {}",
                inst.locator
            )));
        };
        let Some(addr) = self.directory.agent_addr(agent_id) else {
            return Err(ManagerError::Unacceptable(format!(
                "agent {agent_id} not registered"
            )));
        };
        Ok((addr, entity.to_string()))
    }

    fn master_schema_names(&self, master_id: DatabaseId) -> ManagerResult<Vec<String>> {
        Ok(self
            .catalog
            .schemas_for_database(master_id)?
            .into_iter()
            .map(|schema| schema.name)
            .collect())
    }

    // ── Bond ───────────────────────────────────────────────────────

    /// Point a slave's replication channel at a master and record the
    /// relation. Convergent while the relation is not ready.
    pub async fn bond(
        &self,
        slave_id: DatabaseId,
        req: &BondRequest,
    ) -> ManagerResult<SlaveRelation> {
        self.bond_with(slave_id, req, self.deadline()).await
    }

    pub(crate) async fn bond_with(
        &self,
        slave_id: DatabaseId,
        req: &BondRequest,
        deadline: Deadline,
    ) -> ManagerResult<SlaveRelation> {
        let slave = require_database(&self.catalog, slave_id)?;
        let master = require_database(&self.catalog, req.master_id)?;
        check_pair(&master, &slave)?;

        let master_schemas = self.catalog.schemas_for_database(req.master_id)?;
        let catalog_set: BTreeSet<&str> = master_schemas
            .iter()
            .map(|schema| schema.name.as_str())
            .collect();
        let offered: BTreeSet<&str> = req.schemas.iter().map(String::as_str).collect();
        if offered != catalog_set {
            return Err(ManagerError::Unacceptable(
                "master schema set mismatch".to_string(),
            ));
        }
        if !req.schemas.is_empty() && (req.file.is_none() || req.position.is_none()) {
            return Err(ManagerError::Acceptable(
                "binlog coordinates required when schemas exist".to_string(),
            ));
        }
        match self.catalog.get_relation(req.master_id, slave_id)? {
            Some(rel) if rel.ready => {
                return Err(ManagerError::Acceptable(
                    "slave already bonded to master".to_string(),
                ));
            }
            Some(_) => {}
            None => {
                let held = self.catalog.relations_for_slave(slave_id)?.len() as u32;
                if held >= slave.slave_capacity {
                    return Err(ManagerError::Acceptable(
                        "slave database is full".to_string(),
                    ));
                }
            }
        }

        let (addr, entity) = self.agent_route(&slave)?;
        let wire = dbfleet_rpc::wire::BondEntity {
            master: MasterSide {
                database_id: req.master_id,
                host: req.host.clone(),
                port: req.port,
                repl_user: req.repl_user.clone(),
                repl_passwd: req.repl_passwd.clone(),
                file: req.file.clone(),
                position: req.position,
                schemas: req.schemas.clone(),
            },
            force: req.force,
        };
        envelope_client(
            self.agents
                .bond_entity(&addr, &entity, &wire, deadline)
                .await?,
        )?;

        // The channel now exists; the row lands only if the preconditions
        // still hold. Bond is convergent, so a lost race is re-runnable.
        let now = epoch_secs();
        let txn = self.catalog.write()?;
        let Some(slave_row) = txn.database(slave_id)? else {
            return Err(ManagerError::NotFound(format!(
                "database {slave_id} not found"
            )));
        };
        let relation = match txn.relation(req.master_id, slave_id)? {
            Some(mut rel) => {
                if rel.ready {
                    return Err(ManagerError::Acceptable(
                        "slave already bonded to master".to_string(),
                    ));
                }
                rel.ready = req.schemas.is_empty();
                rel.updated_at = now;
                rel
            }
            None => {
                let held = txn.relations_for_slave(slave_id)?.len() as u32;
                if held >= slave_row.slave_capacity {
                    return Err(ManagerError::Acceptable(
                        "slave database is full".to_string(),
                    ));
                }
                SlaveRelation {
                    master_id: req.master_id,
                    slave_id,
                    ready: req.schemas.is_empty(),
                    created_at: now,
                    updated_at: now,
                }
            }
        };
        txn.put_relation(&relation)?;
        txn.commit()?;
        info!(
            master_id = req.master_id,
            slave_id,
            ready = relation.ready,
            "slave bonded"
        );
        Ok(relation)
    }

    // ── GrantSlave ─────────────────────────────────────────────────

    /// Master-side grant followed by the slave-side bond. One-shot per
    /// ready relation; a pending relation from create-with-bond is
    /// continued.
    pub async fn grant_slave(
        &self,
        master_id: DatabaseId,
        slave_id: DatabaseId,
        force: bool,
    ) -> ManagerResult<SlaveRelation> {
        let deadline = self.deadline();
        let master = require_database(&self.catalog, master_id)?;
        let slave = require_database(&self.catalog, slave_id)?;
        check_pair(&master, &slave)?;
        match self.catalog.get_relation(master_id, slave_id)? {
            Some(rel) if rel.ready => {
                return Err(ManagerError::Acceptable(
                    "slave already bonded to master".to_string(),
                ));
            }
            Some(_) => {}
            None => {
                let held = self.catalog.relations_for_slave(slave_id)?.len() as u32;
                if held >= slave.slave_capacity {
                    return Err(ManagerError::Acceptable(
                        "slave database is full".to_string(),
                    ));
                }
            }
        }

        let schemas = self.master_schema_names(master_id)?;
        let user = replication_user(slave_id);
        let passwd = repl_password()?;
        let (master_addr, master_entity) = self.agent_route(&master)?;
        let grant_req = SlaveEntity {
            auth: dbfleet_mysql::ReplAuth {
                user: user.clone(),
                passwd: passwd.clone(),
                source: slave.host.clone(),
            },
            schemas_required: !schemas.is_empty(),
        };
        let resp = envelope_engine(
            self.agents
                .slave_entity(&master_addr, &master_entity, &grant_req, deadline)
                .await?,
        )?;
        let outcome: GrantOutcome = resp.first()?;
        info!(master_id, slave_id, user = %user, "replication credential granted");

        let bond_req = BondRequest {
            master_id,
            host: master.host.clone(),
            port: master.port,
            repl_user: user.clone(),
            repl_passwd: passwd,
            file: outcome.file,
            position: outcome.position,
            schemas: outcome.schemas,
            force,
        };
        match self.bond_with(slave_id, &bond_req, deadline).await {
            Ok(relation) => Ok(relation),
            Err(err) => {
                // The grant already happened; take the credential back so
                // a failed grant leaves nothing behind on the master.
                self.revoke_quietly(&master, &user, &slave.host, deadline)
                    .await;
                Err(err)
            }
        }
    }

    // ── MarkReady ──────────────────────────────────────────────────

    /// Verify the slave's channel serves the master and flip the relation
    /// ready. Monotonic; repeats re-verify and change nothing.
    pub async fn mark_ready(
        &self,
        master_id: DatabaseId,
        slave_id: DatabaseId,
        force: bool,
    ) -> ManagerResult<SlaveRelation> {
        let deadline = self.deadline();
        let Some(_) = self.catalog.get_relation(master_id, slave_id)? else {
            return Err(ManagerError::NotFound(format!(
                "no relation between databases {master_id} and {slave_id}"
            )));
        };
        let Some(master) = self.catalog.get_database(master_id)? else {
            return Err(ManagerError::Unacceptable(
                "master record missing for relation".to_string(),
            ));
        };
        let Some(slave) = self.catalog.get_database(slave_id)? else {
            return Err(ManagerError::Unacceptable(
                "slave record missing for relation".to_string(),
            ));
        };

        if !force {
            let probe = ReplicationReady {
                master_id,
                host: master.host.clone(),
                port: master.port,
                schemas: self.master_schema_names(master_id)?,
            };
            let (addr, entity) = self.agent_route(&slave)?;
            envelope_client(
                self.agents
                    .replication_ready(&addr, &entity, &probe, deadline)
                    .await?,
            )?;
        }

        let now = epoch_secs();
        let txn = self.catalog.write()?;
        let Some(mut relation) = txn.relation(master_id, slave_id)? else {
            return Err(ManagerError::NotFound(format!(
                "no relation between databases {master_id} and {slave_id}"
            )));
        };
        if !relation.ready {
            relation.ready = true;
            relation.updated_at = now;
            txn.put_relation(&relation)?;
        }
        txn.commit()?;
        info!(master_id, slave_id, "relation ready");
        Ok(relation)
    }

    // ── Unbond ─────────────────────────────────────────────────────

    /// Tear the slave's channel down, delete the relation, and revoke the
    /// replication credential on the master.
    pub async fn unbond(
        &self,
        master_id: DatabaseId,
        slave_id: DatabaseId,
        force: bool,
    ) -> ManagerResult<()> {
        let deadline = self.deadline();
        let Some(relation) = self.catalog.get_relation(master_id, slave_id)? else {
            return Err(ManagerError::NotFound(format!(
                "no relation between databases {master_id} and {slave_id}"
            )));
        };
        let Some(master) = self.catalog.get_database(master_id)? else {
            return Err(ManagerError::Unacceptable(
                "master record missing for relation".to_string(),
            ));
        };
        let Some(slave) = self.catalog.get_database(slave_id)? else {
            return Err(ManagerError::Unacceptable(
                "slave record missing for relation".to_string(),
            ));
        };
        let schemas = self.master_schema_names(master_id)?;
        if !schemas.is_empty() && !force {
            return Err(ManagerError::Acceptable(
                "master schemas exist; unbond needs force".to_string(),
            ));
        }

        let (addr, entity) = self.agent_route(&slave)?;
        let req = UnbondEntity {
            master_id,
            ready: relation.ready,
            schemas,
            force,
        };
        envelope_client(
            self.agents
                .unbond_entity(&addr, &entity, &req, deadline)
                .await?,
        )?;

        let txn = self.catalog.write()?;
        txn.remove_relation(master_id, slave_id)?;
        txn.commit()?;
        info!(master_id, slave_id, "slave unbonded");

        // Privilege cleanup is re-runnable; its failure never undoes the
        // unbond.
        self.revoke_quietly(&master, &replication_user(slave_id), &slave.host, deadline)
            .await;
        Ok(())
    }

    /// Best-effort credential revocation on a master's agent.
    pub(crate) async fn revoke_quietly(
        &self,
        master: &DatabaseInstance,
        user: &str,
        source: &str,
        deadline: Deadline,
    ) {
        let req = RevokeEntity {
            user: user.to_string(),
            source: source.to_string(),
        };
        let outcome = match self.agent_route(master) {
            Ok((addr, entity)) => {
                match self
                    .agents
                    .revoke_entity(&addr, &entity, &req, deadline)
                    .await
                {
                    Ok(resp) if resp.is_success() => Ok(()),
                    Ok(resp) => Err(resp.result),
                    Err(err) => Err(err.to_string()),
                }
            }
            Err(err) => Err(err.to_string()),
        };
        if let Err(reason) = outcome {
            warn!(
                database_id = master.database_id,
                %user,
                %reason,
                "revoke failed; credential needs manual cleanup"
            );
        }
    }
}

/// Role, status, and placement checks shared by bond and grant.
fn check_pair(master: &DatabaseInstance, slave: &DatabaseInstance) -> ManagerResult<()> {
    if master.role != InstanceRole::Master {
        return Err(ManagerError::Acceptable(format!(
            "database {} is not a master",
            master.database_id
        )));
    }
    if slave.role != InstanceRole::Slave {
        return Err(ManagerError::Acceptable(format!(
            "database {} is not a slave",
            slave.database_id
        )));
    }
    if slave.status != InstanceStatus::Ok {
        return Err(ManagerError::Acceptable(format!(
            "database {} is not active",
            slave.database_id
        )));
    }
    if master.status != InstanceStatus::Ok {
        return Err(ManagerError::Acceptable(format!(
            "database {} is not active",
            master.database_id
        )));
    }
    if master.backend != slave.backend || master.dbtype != slave.dbtype {
        return Err(ManagerError::Acceptable(
            "master and slave run different backends or engine types".to_string(),
        ));
    }
    Ok(())
}
