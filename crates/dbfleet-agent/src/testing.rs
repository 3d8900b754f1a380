//! Scripted engine and control fakes shared by the agent tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dbfleet_mysql::session::{EngineSession, SessionFactory, SessionTarget};
use dbfleet_mysql::{BinlogCoords, EngineError, EngineResult, ReplicaChannel};

use crate::control::EngineControl;
use crate::error::AgentResult;
use crate::store::EntityRecord;

/// In-memory engine session. Reads answer from the scripted state,
/// mutations are recorded as call strings, and one operation can be
/// scripted to fail.
#[derive(Clone)]
pub struct ScriptedSession {
    channels: Vec<ReplicaChannel>,
    schemas: Vec<String>,
    binlog: bool,
    coords: BinlogCoords,
    fail_op: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            schemas: Vec::new(),
            binlog: true,
            coords: BinlogCoords {
                file: "mysql-bin.000001".to_string(),
                position: 157,
            },
            fail_op: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_channel(mut self, channel: ReplicaChannel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_schemas(mut self, schemas: &[&str]) -> Self {
        self.schemas = schemas.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_binlog(mut self, on: bool) -> Self {
        self.binlog = on;
        self
    }

    pub fn with_coords(mut self, coords: BinlogCoords) -> Self {
        self.coords = coords;
        self
    }

    pub fn failing_on(mut self, op: &str) -> Self {
        self.fail_op = Some(op.to_string());
        self
    }

    /// Mutating calls recorded so far, in order.
    pub fn calls(&self) -> Vec<String> {
        match self.calls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, call: String) {
        if let Ok(mut guard) = self.calls.lock() {
            guard.push(call);
        }
    }

    fn gate(&self, op: &str) -> EngineResult<()> {
        if self.fail_op.as_deref() == Some(op) {
            return Err(EngineError::MalformedStatus(format!(
                "scripted failure in {op}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn replica_channels(&mut self) -> EngineResult<Vec<ReplicaChannel>> {
        self.gate("replica_channels")?;
        Ok(self.channels.clone())
    }

    async fn change_master(
        &mut self,
        channel: &str,
        host: &str,
        port: u16,
        _auth: &dbfleet_mysql::ReplAuth,
        coords: Option<&BinlogCoords>,
    ) -> EngineResult<()> {
        self.gate("change_master")?;
        let mut call = format!("change_master {channel} {host}:{port}");
        if let Some(c) = coords {
            call.push_str(&format!(" {}:{}", c.file, c.position));
        }
        self.record(call);
        Ok(())
    }

    async fn start_slave(&mut self, channel: &str) -> EngineResult<()> {
        self.gate("start_slave")?;
        self.record(format!("start_slave {channel}"));
        Ok(())
    }

    async fn stop_slave(&mut self, channel: &str) -> EngineResult<()> {
        self.gate("stop_slave")?;
        self.record(format!("stop_slave {channel}"));
        Ok(())
    }

    async fn reset_slave(&mut self, channel: &str, all: bool) -> EngineResult<()> {
        self.gate("reset_slave")?;
        if all {
            self.record(format!("reset_slave {channel} all"));
        } else {
            self.record(format!("reset_slave {channel}"));
        }
        Ok(())
    }

    async fn schema_names(&mut self) -> EngineResult<Vec<String>> {
        self.gate("schema_names")?;
        Ok(self.schemas.clone())
    }

    async fn binlog_enabled(&mut self) -> EngineResult<bool> {
        self.gate("binlog_enabled")?;
        Ok(self.binlog)
    }

    async fn master_coords(&mut self) -> EngineResult<BinlogCoords> {
        self.gate("master_coords")?;
        Ok(self.coords.clone())
    }

    async fn reset_master(&mut self) -> EngineResult<()> {
        self.gate("reset_master")?;
        self.record("reset_master".to_string());
        Ok(())
    }

    async fn create_user(&mut self, user: &str, source: &str, _passwd: &str) -> EngineResult<()> {
        self.gate("create_user")?;
        self.record(format!("create_user {user}@{source}"));
        Ok(())
    }

    async fn grant_replication(&mut self, user: &str, source: &str) -> EngineResult<()> {
        self.gate("grant_replication")?;
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
        self.gate("drop_user")?;
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
        self.gate("drop_schema")?;
        self.record(format!("drop_schema {name}"));
        Ok(())
    }
}

/// Hands out clones of one scripted session, so a test can assert on the
/// template's shared call log after the server handler ran.
pub struct ScriptedFactory {
    pub template: ScriptedSession,
}

impl ScriptedFactory {
    pub fn new(template: ScriptedSession) -> Self {
        Self { template }
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn connect(&self, _target: &SessionTarget) -> EngineResult<Box<dyn EngineSession>> {
        Ok(Box::new(self.template.clone()))
    }
}

/// Engine control that flips a flag instead of spawning processes.
pub struct FakeControl {
    pub running: Arc<AtomicBool>,
    pub fail_start: bool,
}

impl FakeControl {
    pub fn new(running: bool) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(running)),
            fail_start: false,
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

#[async_trait]
impl EngineControl for FakeControl {
    async fn start(&self, record: &EntityRecord) -> AgentResult<()> {
        if self.fail_start {
            return Err(crate::error::AgentError::Control(format!(
                "scripted start failure for {}",
                record.entity
            )));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _record: &EntityRecord) -> AgentResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self, _record: &EntityRecord) -> AgentResult<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }
}
