//! Scripted agents, engines, and catalog fixtures shared by the
//! control-plane tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dbfleet_catalog::{
    epoch_secs, BackendKind, CatalogStore, DatabaseId, DatabaseInstance, InstanceRole,
    InstanceStatus, SchemaRecord,
};
use dbfleet_mysql::session::{EngineSession, SessionFactory, SessionTarget};
use dbfleet_mysql::{BinlogCoords, EngineResult, ReplAuth, ReplicaChannel};
use dbfleet_rpc::client::{AgentCall, Deadline};
use dbfleet_rpc::error::{RpcError, RpcResult};
use dbfleet_rpc::wire::{
    BondEntity, BondOutcome, CreateEntity, DeleteEntity, EntityAddress, EntityStatus,
    GrantOutcome, ReplicationReady, RevokeEntity, RpcResponse, SlaveEntity, UnbondEntity,
};

use crate::backend::StaticDirectory;
use crate::manager::DatabaseManager;

// ── Fake agent ─────────────────────────────────────────────────────

/// One recorded agent call.
#[derive(Debug, Clone)]
pub struct AgentCallRecord {
    pub method: &'static str,
    pub addr: String,
    pub entity: String,
    pub body: serde_json::Value,
}

/// Scripted [`AgentCall`]. Answers queued responses per method, falling
/// back to plausible successes; every call is recorded.
#[derive(Clone, Default)]
pub struct FakeAgent {
    calls: Arc<Mutex<Vec<AgentCallRecord>>>,
    scripted: Arc<Mutex<HashMap<&'static str, VecDeque<Result<RpcResponse, String>>>>>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<AgentCallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, method: &str) -> Vec<AgentCallRecord> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }

    /// Queue the next response for a method.
    pub fn script(&self, method: &'static str, resp: RpcResponse) {
        self.scripted
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(Ok(resp));
    }

    /// Queue a transport failure for a method.
    pub fn script_unreachable(&self, method: &'static str, msg: &str) {
        self.scripted
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(Err(msg.to_string()));
    }

    fn answer(
        &self,
        method: &'static str,
        addr: &str,
        entity: &str,
        body: serde_json::Value,
        default: RpcResponse,
    ) -> RpcResult<RpcResponse> {
        self.calls.lock().unwrap().push(AgentCallRecord {
            method,
            addr: addr.to_string(),
            entity: entity.to_string(),
            body,
        });
        let scripted = self.scripted.lock().unwrap().get_mut(method).and_then(VecDeque::pop_front);
        match scripted {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(RpcError::Unreachable {
                addr: addr.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, msg),
            }),
            None => Ok(default),
        }
    }
}

#[async_trait]
impl AgentCall for FakeAgent {
    async fn create_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &CreateEntity,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        let port = if req.port == 0 { 3310 } else { req.port };
        let default = RpcResponse::success_with(
            format!("entity {entity} created"),
            &EntityAddress {
                entity: entity.to_string(),
                port,
                socket: None,
            },
        );
        self.answer(
            "create_entity",
            addr,
            entity,
            serde_json::to_value(req).unwrap(),
            default,
        )
    }

    async fn delete_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &DeleteEntity,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.answer(
            "delete_entity",
            addr,
            entity,
            serde_json::to_value(req).unwrap(),
            RpcResponse::success(format!("entity {entity} deleted")),
        )
    }

    async fn start_entity(
        &self,
        addr: &str,
        entity: &str,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.answer(
            "start_entity",
            addr,
            entity,
            serde_json::Value::Null,
            RpcResponse::success(format!("entity {entity} started")),
        )
    }

    async fn stop_entity(
        &self,
        addr: &str,
        entity: &str,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.answer(
            "stop_entity",
            addr,
            entity,
            serde_json::Value::Null,
            RpcResponse::success(format!("entity {entity} stopped")),
        )
    }

    async fn status_entity(
        &self,
        addr: &str,
        entity: &str,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        let default = RpcResponse::success_with(
            format!("entity {entity} status"),
            &EntityStatus {
                entity: entity.to_string(),
                running: true,
                port: 3310,
            },
        );
        self.answer("status_entity", addr, entity, serde_json::Value::Null, default)
    }

    async fn bond_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &BondEntity,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        let default = RpcResponse::success_with(
            format!("entity {entity} bonded"),
            &BondOutcome {
                channel: format!("masterdb-{}", req.master.database_id),
                started: req.master.schemas.is_empty() || req.master.file.is_some(),
            },
        );
        self.answer(
            "bond_entity",
            addr,
            entity,
            serde_json::to_value(req).unwrap(),
            default,
        )
    }

    async fn unbond_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &UnbondEntity,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.answer(
            "unbond_entity",
            addr,
            entity,
            serde_json::to_value(req).unwrap(),
            RpcResponse::success(format!("entity {entity} unbonded")),
        )
    }

    async fn slave_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &SlaveEntity,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        let default = RpcResponse::success_with(
            format!("entity {entity} granted"),
            &GrantOutcome {
                file: Some("mysql-bin.000001".to_string()),
                position: Some(157),
                schemas: Vec::new(),
            },
        );
        self.answer(
            "slave_entity",
            addr,
            entity,
            serde_json::to_value(req).unwrap(),
            default,
        )
    }

    async fn replication_ready(
        &self,
        addr: &str,
        entity: &str,
        req: &ReplicationReady,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.answer(
            "replication_ready",
            addr,
            entity,
            serde_json::to_value(req).unwrap(),
            RpcResponse::success(format!("entity {entity} replication ready")),
        )
    }

    async fn revoke_entity(
        &self,
        addr: &str,
        entity: &str,
        req: &RevokeEntity,
        _deadline: Deadline,
    ) -> RpcResult<RpcResponse> {
        self.answer(
            "revoke_entity",
            addr,
            entity,
            serde_json::to_value(req).unwrap(),
            RpcResponse::success(format!("entity {entity} revoked")),
        )
    }
}

// ── Fake engine sessions ───────────────────────────────────────────

/// Engine session for schema maintenance tests: records mutations, reads
/// answer fixed defaults.
#[derive(Clone, Default)]
pub struct RecordedEngine {
    calls: Arc<Mutex<Vec<String>>>,
    fail_op: Option<String>,
}

impl RecordedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, op: &str) -> Self {
        self.fail_op = Some(op.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn gate(&self, op: &str) -> EngineResult<()> {
        if self.fail_op.as_deref() == Some(op) {
            return Err(dbfleet_mysql::EngineError::MalformedStatus(format!(
                "scripted failure in {op}"
            )));
        }
        Ok(())
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl EngineSession for RecordedEngine {
    async fn replica_channels(&mut self) -> EngineResult<Vec<ReplicaChannel>> {
        Ok(Vec::new())
    }

    async fn change_master(
        &mut self,
        channel: &str,
        host: &str,
        port: u16,
        _auth: &ReplAuth,
        _coords: Option<&BinlogCoords>,
    ) -> EngineResult<()> {
        self.record(format!("change_master {channel} {host}:{port}"));
        Ok(())
    }

    async fn start_slave(&mut self, channel: &str) -> EngineResult<()> {
        self.record(format!("start_slave {channel}"));
        Ok(())
    }

    async fn stop_slave(&mut self, channel: &str) -> EngineResult<()> {
        self.record(format!("stop_slave {channel}"));
        Ok(())
    }

    async fn reset_slave(&mut self, channel: &str, _all: bool) -> EngineResult<()> {
        self.record(format!("reset_slave {channel}"));
        Ok(())
    }

    async fn schema_names(&mut self) -> EngineResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn binlog_enabled(&mut self) -> EngineResult<bool> {
        Ok(true)
    }

    async fn master_coords(&mut self) -> EngineResult<BinlogCoords> {
        Ok(BinlogCoords {
            file: "mysql-bin.000001".to_string(),
            position: 157,
        })
    }

    async fn reset_master(&mut self) -> EngineResult<()> {
        self.record("reset_master".to_string());
        Ok(())
    }

    async fn create_user(&mut self, user: &str, source: &str, _passwd: &str) -> EngineResult<()> {
        self.gate("create_user")?;
        self.record(format!("create_user {user}@{source}"));
        Ok(())
    }

    async fn grant_replication(&mut self, user: &str, source: &str) -> EngineResult<()> {
        self.record(format!("grant_replication {user}@{source}"));
        Ok(())
    }

    async fn grant_schema(
        &mut self,
        privileges: &str,
        schema: &str,
        user: &str,
        source: &str,
    ) -> EngineResult<()> {
        self.gate("grant_schema")?;
        self.record(format!("grant_schema {privileges} on {schema} to {user}@{source}"));
        Ok(())
    }

    async fn drop_user(&mut self, user: &str, source: &str) -> EngineResult<()> {
        self.record(format!("drop_user {user}@{source}"));
        Ok(())
    }

    async fn create_schema(
        &mut self,
        name: &str,
        _character_set: Option<&str>,
        _collation: Option<&str>,
    ) -> EngineResult<()> {
        self.gate("create_schema")?;
        self.record(format!("create_schema {name}"));
        Ok(())
    }

    async fn drop_schema(&mut self, name: &str) -> EngineResult<()> {
        self.record(format!("drop_schema {name}"));
        Ok(())
    }
}

pub struct RecordedEngineFactory {
    pub template: RecordedEngine,
}

#[async_trait]
impl SessionFactory for RecordedEngineFactory {
    async fn connect(&self, _target: &SessionTarget) -> EngineResult<Box<dyn EngineSession>> {
        Ok(Box::new(self.template.clone()))
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

pub fn fleet_directory() -> Arc<StaticDirectory> {
    Arc::new(StaticDirectory::new([
        ("agent-1".to_string(), "127.0.0.1:9901".to_string()),
        ("agent-2".to_string(), "127.0.0.1:9902".to_string()),
    ]))
}

fn instance(
    database_id: DatabaseId,
    role: InstanceRole,
    slave_capacity: u32,
    agent: &str,
) -> DatabaseInstance {
    let now = epoch_secs();
    DatabaseInstance {
        database_id,
        backend: BackendKind::LocalAgent,
        dbtype: "mysql".to_string(),
        dbversion: None,
        locator: format!("{agent}/{database_id}"),
        host: "127.0.0.1".to_string(),
        port: 3300 + database_id as u16,
        user: "root".to_string(),
        passwd: Some("secret".to_string()),
        status: InstanceStatus::Ok,
        role,
        slave_capacity,
        desc: None,
        created_at: now,
        updated_at: now,
    }
}

/// A serving master hosted on agent-1.
pub fn master_on_agent(database_id: DatabaseId) -> DatabaseInstance {
    instance(database_id, InstanceRole::Master, 0, "agent-1")
}

/// A serving slave hosted on agent-2.
pub fn slave_on_agent(database_id: DatabaseId, slave_capacity: u32) -> DatabaseInstance {
    instance(database_id, InstanceRole::Slave, slave_capacity, "agent-2")
}

/// A schema row owned by a master, with stock credentials.
pub fn schema_record(schema_id: u64, database_id: DatabaseId, name: &str) -> SchemaRecord {
    SchemaRecord {
        schema_id,
        database_id,
        name: name.to_string(),
        user: format!("{name}_rw"),
        passwd: "rw-secret".to_string(),
        ro_user: format!("{name}_ro"),
        ro_passwd: "ro-secret".to_string(),
        source: "%".to_string(),
        rosource: "%".to_string(),
        character_set: None,
        collation: None,
        created_at: epoch_secs(),
    }
}

/// A master on the static-record backend.
pub fn static_master(database_id: DatabaseId, locator: &str) -> DatabaseInstance {
    let mut inst = instance(database_id, InstanceRole::Master, 0, "agent-1");
    inst.backend = BackendKind::StaticRecord;
    inst.locator = locator.to_string();
    inst.host = "10.9.0.4".to_string();
    inst.port = 3306;
    inst
}

/// A manager over an in-memory catalog, the given fake agent, and a
/// recorded engine.
pub struct TestBed {
    pub manager: DatabaseManager,
    pub catalog: CatalogStore,
    pub agent: FakeAgent,
    pub engine: RecordedEngine,
}

pub fn testbed() -> TestBed {
    let catalog = CatalogStore::open_in_memory().unwrap();
    let agent = FakeAgent::new();
    let engine = RecordedEngine::new();
    let manager = DatabaseManager::new(
        catalog.clone(),
        Arc::new(agent.clone()),
        fleet_directory(),
        Arc::new(RecordedEngineFactory {
            template: engine.clone(),
        }),
        Duration::from_secs(5),
    );
    TestBed {
        manager,
        catalog,
        agent,
        engine,
    }
}
