//! Database lifecycle sagas plus the schema and quote registry.
//!
//! Mutations follow one shape: preflight against a read snapshot, do the
//! remote work (backend RPC or engine session), then write the catalog in
//! a re-validating transaction. Two-phase backends get a commit after the
//! rows land and an abort on any earlier failure, so a failed create
//! leaves neither rows nor a half-provisioned engine behind.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dbfleet_catalog::{
    epoch_secs, BackendKind, CatalogStore, DatabaseId, DatabaseInstance, FleetTask, InstanceRole,
    InstanceStatus, QuoteId, SchemaQuote, SchemaRecord, SlaveRelation, TaskKind, TaskStatus,
};
use dbfleet_mysql::session::{EngineSession, SessionFactory, SessionTarget};
use dbfleet_mysql::{replication_user, valid_schema_name};
use dbfleet_rpc::client::{AgentCall, Deadline};

use crate::backend::{
    abort_quietly, AgentDirectory, BackendRegistry, CreateSpec, InstanceHealth,
    ProvisioningBackend,
};
use crate::error::{ManagerError, ManagerResult};
use crate::replication::{require_database, ReplicationCoordinator};

// ── Requests and answers ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDatabaseRequest {
    pub backend: BackendKind,
    pub dbtype: String,
    #[serde(default)]
    pub dbversion: Option<String>,
    /// Administrative credential for the new instance.
    pub user: String,
    #[serde(default)]
    pub passwd: Option<String>,
    /// Zero makes a master; anything above makes a slave that may hold
    /// that many master links.
    #[serde(default)]
    pub slave_capacity: u32,
    /// Placement hint for the local-agent backend.
    #[serde(default)]
    pub agent: Option<String>,
    /// Placement hint for the static-record backend.
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Slave to bond the new master to once it serves.
    #[serde(default)]
    pub bond: Option<DatabaseId>,
    #[serde(default)]
    pub desc: Option<String>,
}

/// One row of `list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSummary {
    pub database_id: DatabaseId,
    pub backend: BackendKind,
    pub dbtype: String,
    pub host: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub role: InstanceRole,
    pub slave_capacity: u32,
    pub desc: Option<String>,
}

impl From<&DatabaseInstance> for DatabaseSummary {
    fn from(inst: &DatabaseInstance) -> Self {
        Self {
            database_id: inst.database_id,
            backend: inst.backend,
            dbtype: inst.dbtype.clone(),
            host: inst.host.clone(),
            port: inst.port,
            status: inst.status,
            role: inst.role,
            slave_capacity: inst.slave_capacity,
            desc: inst.desc.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub backend: Option<BackendKind>,
    pub dbtype: Option<String>,
}

/// `show`: the instance with everything hanging off it.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseDetail {
    pub instance: DatabaseInstance,
    pub schemas: Vec<SchemaRecord>,
    /// Relations where this instance is the slave.
    pub masters: Vec<SlaveRelation>,
    /// Relations where this instance is the master.
    pub slaves: Vec<SlaveRelation>,
    /// Quotes this instance serves.
    pub quotes: Vec<SchemaQuote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaAuth {
    pub user: String,
    pub passwd: String,
    pub ro_user: String,
    pub ro_passwd: String,
    /// Grant source hosts, default `%`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub rosource: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSchemaRequest {
    pub name: String,
    pub auth: SchemaAuth,
    #[serde(default)]
    pub character_set: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuoteRequest {
    /// Master owning the schema.
    pub database_id: DatabaseId,
    pub schema_name: String,
    /// Consuming service.
    pub entity: String,
    pub endpoint: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub desc: Option<String>,
}

/// A quote plus the connectable credential it grants.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteGrant {
    pub quote: SchemaQuote,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub passwd: String,
    pub schema: String,
}

// ── Manager ────────────────────────────────────────────────────────

/// The control plane's mutation surface over one catalog.
pub struct DatabaseManager {
    catalog: CatalogStore,
    backends: BackendRegistry,
    replication: ReplicationCoordinator,
    sessions: Arc<dyn SessionFactory>,
    budget: Duration,
}

impl DatabaseManager {
    pub fn new(
        catalog: CatalogStore,
        agents: Arc<dyn AgentCall>,
        directory: Arc<dyn AgentDirectory>,
        sessions: Arc<dyn SessionFactory>,
        budget: Duration,
    ) -> Self {
        let backends = BackendRegistry::new(catalog.clone(), agents.clone(), directory.clone());
        let replication = ReplicationCoordinator::new(catalog.clone(), agents, directory, budget);
        Self {
            catalog,
            backends,
            replication,
            sessions,
            budget,
        }
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn replication(&self) -> &ReplicationCoordinator {
        &self.replication
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.budget)
    }

    fn backend(&self, kind: BackendKind) -> ManagerResult<Arc<dyn ProvisioningBackend>> {
        self.backends.get(kind)
    }

    /// Admin engine session on an instance. Refuses unmanageable rows.
    async fn admin_session(
        &self,
        inst: &DatabaseInstance,
    ) -> ManagerResult<Box<dyn EngineSession>> {
        let Some(passwd) = inst.passwd.clone() else {
            return Err(ManagerError::Acceptable(format!(
                "database {} is not manageable (no stored credential)",
                inst.database_id
            )));
        };
        let target = SessionTarget {
            host: inst.host.clone(),
            port: inst.port,
            socket: None,
            user: inst.user.clone(),
            passwd,
        };
        Ok(self.sessions.connect(&target).await?)
    }

    // ── CreateDatabase ─────────────────────────────────────────────

    pub async fn create_database(
        &self,
        req: &CreateDatabaseRequest,
    ) -> ManagerResult<DatabaseInstance> {
        let deadline = self.deadline();
        if req.dbtype != "mysql" {
            return Err(ManagerError::Acceptable(format!(
                "unsupported engine type: {}",
                req.dbtype
            )));
        }
        let role = if req.slave_capacity > 0 {
            InstanceRole::Slave
        } else {
            InstanceRole::Master
        };
        if req.bond.is_some() && role != InstanceRole::Master {
            return Err(ManagerError::Acceptable(
                "create-time bond is only valid for a master database".to_string(),
            ));
        }
        if let Some(slave_id) = req.bond {
            self.check_bond_target(slave_id)?;
        }

        let database_id = self.catalog.next_id("database_id")?;
        let backend = self.backend(req.backend)?;
        let spec = CreateSpec {
            database_id,
            dbtype: req.dbtype.clone(),
            user: req.user.clone(),
            passwd: req.passwd.clone().unwrap_or_default(),
            agent: req.agent.clone(),
            zone: req.zone.clone(),
            port: req.port,
        };
        let prepared = backend.prepare_create(&spec, deadline).await?;

        let now = epoch_secs();
        let inst = DatabaseInstance {
            database_id,
            backend: req.backend,
            dbtype: req.dbtype.clone(),
            dbversion: req.dbversion.clone(),
            locator: prepared.locator.clone(),
            host: prepared.host.clone(),
            port: prepared.port,
            user: req.user.clone(),
            passwd: req.passwd.clone(),
            status: InstanceStatus::Unactive,
            role,
            slave_capacity: req.slave_capacity,
            desc: req.desc.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.write_created(&inst, req.bond, now) {
            abort_quietly(&backend, &prepared.token, deadline).await;
            return Err(err);
        }
        if let Err(err) = backend.commit(&prepared.token, deadline).await {
            if let Err(undo) = self.unwrite_created(database_id, req.bond) {
                warn!(database_id, error = %undo, "row rollback failed after commit error");
            }
            abort_quietly(&backend, &prepared.token, deadline).await;
            return Err(err);
        }

        self.enqueue_confirm(database_id, req.bond)?;
        info!(
            database_id,
            backend = %req.backend,
            role = ?role,
            locator = %inst.locator,
            "database created"
        );
        Ok(inst)
    }

    fn check_bond_target(&self, slave_id: DatabaseId) -> ManagerResult<()> {
        let Some(slave) = self.catalog.get_database(slave_id)? else {
            return Err(ManagerError::Acceptable(format!(
                "bond target database {slave_id} not found"
            )));
        };
        if slave.role != InstanceRole::Slave {
            return Err(ManagerError::Acceptable(format!(
                "bond target database {slave_id} is not a slave"
            )));
        }
        if slave.status != InstanceStatus::Ok {
            return Err(ManagerError::Acceptable(format!(
                "bond target database {slave_id} is not active"
            )));
        }
        let held = self.catalog.relations_for_slave(slave_id)?.len() as u32;
        if held >= slave.slave_capacity {
            return Err(ManagerError::Acceptable(format!(
                "bond target database {slave_id} is full"
            )));
        }
        Ok(())
    }

    fn write_created(
        &self,
        inst: &DatabaseInstance,
        bond: Option<DatabaseId>,
        now: u64,
    ) -> ManagerResult<()> {
        let txn = self.catalog.write()?;
        txn.insert_database(inst)?;
        if let Some(slave_id) = bond {
            let Some(slave) = txn.database(slave_id)? else {
                return Err(ManagerError::Acceptable(format!(
                    "bond target database {slave_id} not found"
                )));
            };
            if slave.role != InstanceRole::Slave || slave.status != InstanceStatus::Ok {
                return Err(ManagerError::Acceptable(format!(
                    "bond target database {slave_id} is not a bondable slave"
                )));
            }
            let held = txn.relations_for_slave(slave_id)?.len() as u32;
            if held >= slave.slave_capacity {
                return Err(ManagerError::Acceptable(format!(
                    "bond target database {slave_id} is full"
                )));
            }
            txn.put_relation(&SlaveRelation {
                master_id: inst.database_id,
                slave_id,
                ready: false,
                created_at: now,
                updated_at: now,
            })?;
        }
        txn.commit()?;
        Ok(())
    }

    fn unwrite_created(&self, database_id: DatabaseId, bond: Option<DatabaseId>) -> ManagerResult<()> {
        let txn = self.catalog.write()?;
        if let Some(slave_id) = bond {
            txn.remove_relation(database_id, slave_id)?;
        }
        txn.remove_database(database_id)?;
        txn.commit()?;
        Ok(())
    }

    fn enqueue_confirm(&self, database_id: DatabaseId, bond: Option<DatabaseId>) -> ManagerResult<()> {
        let now = epoch_secs();
        let task = FleetTask {
            task_id: self.catalog.next_id("task_id")?,
            kind: TaskKind::ConfirmCreate { database_id, bond },
            status: TaskStatus::Pending,
            attempts: 0,
            not_before: 0,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.catalog.put_task(&task)?;
        Ok(())
    }

    /// Confirm-create completion: flip a freshly provisioned instance to
    /// serving. Already-active rows pass through.
    pub(crate) fn mark_active(&self, database_id: DatabaseId) -> ManagerResult<()> {
        let txn = self.catalog.write()?;
        let Some(mut inst) = txn.database(database_id)? else {
            return Err(ManagerError::NotFound(format!(
                "database {database_id} not found"
            )));
        };
        if inst.status == InstanceStatus::Unactive {
            inst.status = InstanceStatus::Ok;
            inst.updated_at = epoch_secs();
            txn.put_database(&inst)?;
        }
        txn.commit()?;
        info!(database_id, "database serving");
        Ok(())
    }

    // ── DeleteDatabase ─────────────────────────────────────────────

    pub async fn delete_database(&self, database_id: DatabaseId, force: bool) -> ManagerResult<()> {
        let deadline = self.deadline();
        let inst = require_database(&self.catalog, database_id)?;
        match inst.role {
            InstanceRole::Master => self.delete_master(&inst, force, deadline).await,
            InstanceRole::Slave => self.delete_slave(&inst, force, deadline).await,
        }
    }

    async fn delete_master(
        &self,
        inst: &DatabaseInstance,
        force: bool,
        deadline: Deadline,
    ) -> ManagerResult<()> {
        let id = inst.database_id;
        let schemas = self.catalog.schemas_for_database(id)?;
        if !schemas.is_empty() {
            return Err(ManagerError::Acceptable(format!(
                "database {id} still owns {} schema(s)",
                schemas.len()
            )));
        }
        let slaves = self.catalog.relations_for_master(id)?;
        if !slaves.is_empty() {
            return Err(ManagerError::Acceptable(format!(
                "database {id} still has {} bonded slave(s)",
                slaves.len()
            )));
        }
        let quotes = self.catalog.quotes_for_qdatabase(id)?;
        if !quotes.is_empty() {
            return Err(ManagerError::Acceptable(format!(
                "database {id} still serves {} quote(s)",
                quotes.len()
            )));
        }

        let backend = self.backend(inst.backend)?;
        let token = backend.prepare_delete(inst, force, deadline).await?;
        if let Err(err) = self.remove_rows(id, &[]) {
            abort_quietly(&backend, &token, deadline).await;
            return Err(err);
        }
        backend.commit(&token, deadline).await?;
        info!(database_id = id, "database deleted");
        Ok(())
    }

    async fn delete_slave(
        &self,
        inst: &DatabaseInstance,
        force: bool,
        deadline: Deadline,
    ) -> ManagerResult<()> {
        let id = inst.database_id;
        let quotes = self.catalog.quotes_for_qdatabase(id)?;
        if !quotes.is_empty() {
            return Err(ManagerError::Acceptable(format!(
                "database {id} still serves {} quote(s)",
                quotes.len()
            )));
        }
        let relations = self.catalog.relations_for_slave(id)?;
        let mut masters = Vec::with_capacity(relations.len());
        for rel in &relations {
            let Some(master) = self.catalog.get_database(rel.master_id)? else {
                return Err(ManagerError::Unacceptable(format!(
                    "slave's master record missing: database {}",
                    rel.master_id
                )));
            };
            masters.push(master);
        }

        let backend = self.backend(inst.backend)?;
        let token = backend.prepare_delete(inst, force, deadline).await?;
        if let Err(err) = self.remove_rows(id, &relations) {
            abort_quietly(&backend, &token, deadline).await;
            return Err(err);
        }
        backend.commit(&token, deadline).await?;

        // The channels died with the instance; the credentials it used
        // still exist on every former master.
        let user = replication_user(id);
        for master in &masters {
            self.replication
                .revoke_quietly(master, &user, &inst.host, deadline)
                .await;
        }
        info!(database_id = id, "database deleted");
        Ok(())
    }

    fn remove_rows(&self, database_id: DatabaseId, relations: &[SlaveRelation]) -> ManagerResult<()> {
        let txn = self.catalog.write()?;
        for rel in relations {
            txn.remove_relation(rel.master_id, rel.slave_id)?;
        }
        txn.remove_database(database_id)?;
        txn.commit()?;
        Ok(())
    }

    // ── Lifecycle forwarding ───────────────────────────────────────

    pub async fn start_database(&self, database_id: DatabaseId) -> ManagerResult<()> {
        let inst = require_database(&self.catalog, database_id)?;
        let backend = self.backend(inst.backend)?;
        backend.start(&inst, self.deadline()).await
    }

    pub async fn stop_database(&self, database_id: DatabaseId) -> ManagerResult<()> {
        let inst = require_database(&self.catalog, database_id)?;
        let backend = self.backend(inst.backend)?;
        backend.stop(&inst, self.deadline()).await
    }

    pub async fn database_status(&self, database_id: DatabaseId) -> ManagerResult<InstanceHealth> {
        let inst = require_database(&self.catalog, database_id)?;
        let backend = self.backend(inst.backend)?;
        backend.status(&inst, self.deadline()).await
    }

    // ── Show and list ──────────────────────────────────────────────

    pub fn show_database(&self, database_id: DatabaseId) -> ManagerResult<DatabaseDetail> {
        let instance = require_database(&self.catalog, database_id)?;
        Ok(DatabaseDetail {
            schemas: self.catalog.schemas_for_database(database_id)?,
            masters: self.catalog.relations_for_slave(database_id)?,
            slaves: self.catalog.relations_for_master(database_id)?,
            quotes: self.catalog.quotes_for_qdatabase(database_id)?,
            instance,
        })
    }

    pub fn list_databases(&self, filter: &ListFilter) -> ManagerResult<Vec<DatabaseSummary>> {
        Ok(self
            .catalog
            .list_databases()?
            .iter()
            .filter(|inst| filter.backend.is_none_or(|kind| inst.backend == kind))
            .filter(|inst| {
                filter
                    .dbtype
                    .as_deref()
                    .is_none_or(|dbtype| inst.dbtype == dbtype)
            })
            .map(DatabaseSummary::from)
            .collect())
    }

    // ── Schemas ────────────────────────────────────────────────────

    pub async fn create_schema(
        &self,
        database_id: DatabaseId,
        req: &CreateSchemaRequest,
    ) -> ManagerResult<SchemaRecord> {
        let inst = require_database(&self.catalog, database_id)?;
        if inst.role != InstanceRole::Master {
            return Err(ManagerError::Acceptable(format!(
                "database {database_id} is not a master"
            )));
        }
        if inst.status != InstanceStatus::Ok {
            return Err(ManagerError::Acceptable(format!(
                "database {database_id} is not active"
            )));
        }
        if !valid_schema_name(&req.name) {
            return Err(ManagerError::Acceptable(format!(
                "invalid schema name: {}",
                req.name
            )));
        }
        if self.catalog.get_schema(database_id, &req.name)?.is_some() {
            return Err(ManagerError::Acceptable(format!(
                "schema {} already exists on database {database_id}",
                req.name
            )));
        }

        let source = req.auth.source.as_deref().unwrap_or("%");
        let rosource = req.auth.rosource.as_deref().unwrap_or("%");
        let mut session = self.admin_session(&inst).await?;
        session
            .create_schema(
                &req.name,
                req.character_set.as_deref(),
                req.collation.as_deref(),
            )
            .await?;
        session
            .create_user(&req.auth.user, source, &req.auth.passwd)
            .await?;
        session
            .grant_schema("ALL", &req.name, &req.auth.user, source)
            .await?;
        session
            .create_user(&req.auth.ro_user, rosource, &req.auth.ro_passwd)
            .await?;
        session
            .grant_schema("SELECT", &req.name, &req.auth.ro_user, rosource)
            .await?;

        let schema = SchemaRecord {
            schema_id: self.catalog.next_id("schema_id")?,
            database_id,
            name: req.name.clone(),
            user: req.auth.user.clone(),
            passwd: req.auth.passwd.clone(),
            ro_user: req.auth.ro_user.clone(),
            ro_passwd: req.auth.ro_passwd.clone(),
            source: source.to_string(),
            rosource: rosource.to_string(),
            character_set: req.character_set.clone(),
            collation: req.collation.clone(),
            created_at: epoch_secs(),
        };
        let txn = self.catalog.write()?;
        txn.insert_schema(&schema)?;
        txn.commit()?;
        info!(database_id, schema = %schema.name, "schema created");
        Ok(schema)
    }

    pub fn show_schema(&self, database_id: DatabaseId, name: &str) -> ManagerResult<SchemaRecord> {
        require_database(&self.catalog, database_id)?;
        self.catalog.get_schema(database_id, name)?.ok_or_else(|| {
            ManagerError::NotFound(format!("schema {name} not found on database {database_id}"))
        })
    }

    pub async fn delete_schema(
        &self,
        database_id: DatabaseId,
        name: &str,
        force: bool,
    ) -> ManagerResult<()> {
        let inst = require_database(&self.catalog, database_id)?;
        let Some(schema) = self.catalog.get_schema(database_id, name)? else {
            return Err(ManagerError::NotFound(format!(
                "schema {name} not found on database {database_id}"
            )));
        };
        let quotes = self.catalog.quotes_for_schema(schema.schema_id)?;
        if !quotes.is_empty() && !force {
            return Err(ManagerError::Acceptable(format!(
                "schema {name} has {} quote(s); delete needs force",
                quotes.len()
            )));
        }

        let mut session = self.admin_session(&inst).await?;
        session.drop_user(&schema.user, &schema.source).await?;
        session.drop_user(&schema.ro_user, &schema.rosource).await?;
        session.drop_schema(&schema.name).await?;

        let txn = self.catalog.write()?;
        for quote in &quotes {
            txn.remove_quote(quote.quote_id)?;
        }
        txn.remove_schema(database_id, name)?;
        txn.commit()?;
        info!(database_id, schema = %name, cascaded = quotes.len(), "schema deleted");
        Ok(())
    }

    // ── Quotes ─────────────────────────────────────────────────────

    pub fn create_quote(&self, req: &CreateQuoteRequest) -> ManagerResult<QuoteGrant> {
        let master = require_database(&self.catalog, req.database_id)?;
        if master.role != InstanceRole::Master {
            return Err(ManagerError::Acceptable(format!(
                "database {} is not a master",
                req.database_id
            )));
        }
        let Some(schema) = self.catalog.get_schema(req.database_id, &req.schema_name)? else {
            return Err(ManagerError::NotFound(format!(
                "schema {} not found on database {}",
                req.schema_name, req.database_id
            )));
        };

        let serving = if req.readonly {
            self.pick_ready_slave(req.database_id)?
        } else {
            master
        };
        let quote = SchemaQuote {
            quote_id: self.catalog.next_id("quote_id")?,
            schema_id: schema.schema_id,
            database_id: req.database_id,
            qdatabase_id: serving.database_id,
            entity: req.entity.clone(),
            endpoint: req.endpoint.clone(),
            desc: req.desc.clone(),
            created_at: epoch_secs(),
        };
        let txn = self.catalog.write()?;
        txn.put_quote(&quote)?;
        txn.commit()?;

        let (user, passwd) = if req.readonly {
            (schema.ro_user.clone(), schema.ro_passwd.clone())
        } else {
            (schema.user.clone(), schema.passwd.clone())
        };
        info!(
            quote_id = quote.quote_id,
            database_id = req.database_id,
            qdatabase_id = serving.database_id,
            entity = %req.entity,
            "quote created"
        );
        Ok(QuoteGrant {
            quote,
            host: serving.host.clone(),
            port: serving.port,
            user,
            passwd,
            schema: schema.name,
        })
    }

    /// First ready, serving slave of a master.
    fn pick_ready_slave(&self, master_id: DatabaseId) -> ManagerResult<DatabaseInstance> {
        for rel in self.catalog.relations_for_master(master_id)? {
            if !rel.ready {
                continue;
            }
            if let Some(slave) = self.catalog.get_database(rel.slave_id)? {
                if slave.status == InstanceStatus::Ok {
                    return Ok(slave);
                }
            }
        }
        Err(ManagerError::Acceptable(format!(
            "no ready slave for database {master_id}"
        )))
    }

    pub fn show_quote(&self, quote_id: QuoteId) -> ManagerResult<QuoteGrant> {
        let Some(quote) = self.catalog.get_quote(quote_id)? else {
            return Err(ManagerError::NotFound(format!("quote {quote_id} not found")));
        };
        let Some(serving) = self.catalog.get_database(quote.qdatabase_id)? else {
            return Err(ManagerError::Unacceptable(format!(
                "quote {quote_id} points at a missing database"
            )));
        };
        let schema = self
            .catalog
            .schemas_for_database(quote.database_id)?
            .into_iter()
            .find(|schema| schema.schema_id == quote.schema_id)
            .ok_or_else(|| {
                ManagerError::Unacceptable(format!("quote {quote_id} points at a missing schema"))
            })?;
        let readonly = quote.qdatabase_id != quote.database_id;
        let (user, passwd) = if readonly {
            (schema.ro_user.clone(), schema.ro_passwd.clone())
        } else {
            (schema.user.clone(), schema.passwd.clone())
        };
        Ok(QuoteGrant {
            host: serving.host.clone(),
            port: serving.port,
            user,
            passwd,
            schema: schema.name,
            quote,
        })
    }

    pub fn delete_quote(&self, quote_id: QuoteId) -> ManagerResult<()> {
        let txn = self.catalog.write()?;
        if !txn.remove_quote(quote_id)? {
            return Err(ManagerError::NotFound(format!("quote {quote_id} not found")));
        }
        txn.commit()?;
        info!(quote_id, "quote deleted");
        Ok(())
    }
}
