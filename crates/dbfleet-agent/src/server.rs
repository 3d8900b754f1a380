//! Agent RPC surface.
//!
//! Every handler answers HTTP 200 with an [`RpcResponse`] envelope; the
//! `resultcode` carries the outcome. Transport-level statuses are left to
//! the framework (bad JSON, unknown routes), so a non-200 always means
//! the request never reached an operation.
//!
//! Handlers serialize per entity: the caller's deadline header bounds how
//! long a request waits for the entity lock before answering `locked`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use dbfleet_mysql::session::{EngineSession, SessionFactory, SessionTarget};
use dbfleet_rpc::client::{Deadline, DEADLINE_HEADER, DEFAULT_OP_BUDGET};
use dbfleet_rpc::wire::{
    BondEntity, CreateEntity, DeleteEntity, EntityAddress, EntityStatus, ReplicationReady,
    RevokeEntity, RpcResponse, SlaveEntity, UnbondEntity,
};

use crate::control::EngineControl;
use crate::error::{AgentError, AgentResult};
use crate::locks::EntityLocks;
use crate::replication;
use crate::store::{EntityRecord, EntityStore};

/// Shared state for the agent's handlers.
#[derive(Clone)]
pub struct AgentState {
    pub store: EntityStore,
    pub locks: Arc<EntityLocks>,
    pub control: Arc<dyn EngineControl>,
    pub sessions: Arc<dyn SessionFactory>,
}

impl AgentState {
    pub fn new(
        store: EntityStore,
        control: Arc<dyn EngineControl>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            store,
            locks: Arc::new(EntityLocks::new()),
            control,
            sessions,
        }
    }

    fn record(&self, entity: &str) -> AgentResult<EntityRecord> {
        self.store
            .get(entity)?
            .ok_or_else(|| AgentError::UnknownEntity(entity.to_string()))
    }

    /// Session against the locally hosted entity, using its stored
    /// administrative credential.
    async fn session(&self, record: &EntityRecord) -> AgentResult<Box<dyn EngineSession>> {
        let target = SessionTarget {
            host: "127.0.0.1".to_string(),
            port: record.port,
            socket: record.socket.clone(),
            user: record.user.clone(),
            passwd: record.passwd.clone(),
        };
        Ok(self.sessions.connect(&target).await?)
    }
}

/// Routes for one agent.
pub fn build_router(state: AgentState) -> Router {
    Router::new()
        .route(
            "/v1/entities/{entity}",
            post(create_entity).delete(delete_entity),
        )
        .route("/v1/entities/{entity}/start", post(start_entity))
        .route("/v1/entities/{entity}/stop", post(stop_entity))
        .route("/v1/entities/{entity}/status", get(status_entity))
        .route("/v1/entities/{entity}/bond", post(bond_entity))
        .route("/v1/entities/{entity}/unbond", post(unbond_entity))
        .route("/v1/entities/{entity}/slave", post(slave_entity))
        .route("/v1/entities/{entity}/ready", post(replication_ready))
        .route("/v1/entities/{entity}/revoke", post(revoke_entity))
        .with_state(state)
}

fn deadline_from(headers: &HeaderMap) -> Deadline {
    headers
        .get(DEADLINE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(Deadline::from_millis_header)
        .unwrap_or_else(|| Deadline::after(DEFAULT_OP_BUDGET))
}

fn envelope_err(entity: &str, op: &str, err: AgentError) -> RpcResponse {
    warn!(%entity, %op, error = %err, "operation failed");
    match err {
        AgentError::Busy(_) => RpcResponse::locked(err.to_string()),
        other => RpcResponse::error(other.to_string()),
    }
}

async fn pick_port() -> AgentResult<u16> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|err| AgentError::Control(format!("no free port: {err}")))?;
    let port = listener
        .local_addr()
        .map_err(|err| AgentError::Control(format!("no free port: {err}")))?
        .port();
    Ok(port)
}

// ── Lifecycle handlers ─────────────────────────────────────────────

async fn create_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateEntity>,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply: AgentResult<EntityAddress> = async {
        if state.store.get(&entity)?.is_some() {
            return Err(AgentError::Refused(format!("entity {entity} already exists")));
        }
        let port = if req.port == 0 { pick_port().await? } else { req.port };
        let record = EntityRecord::new(&entity, port, req.socket.clone(), &req.user, &req.passwd);
        state.store.put(&record)?;
        if req.start {
            // The record stays on start failure; the caller decides
            // whether to retry the start or delete the entity.
            state.control.start(&record).await?;
        }
        info!(%entity, port, started = req.start, "entity created");
        Ok(EntityAddress {
            entity: record.entity,
            port,
            socket: record.socket,
        })
    }
    .await;
    match reply {
        Ok(address) => Json(RpcResponse::success_with(
            format!("entity {entity} created"),
            &address,
        )),
        Err(err) => Json(envelope_err(&entity, "create", err)),
    }
}

async fn delete_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(req): Json<DeleteEntity>,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply: AgentResult<String> = async {
        let Some(record) = state.store.get(&entity)? else {
            // Re-runnable: a repeated delete (or a create abort) finds
            // nothing and succeeds.
            return Ok(format!("entity {entity} already absent"));
        };
        if state.control.status(&record).await? {
            if !req.force {
                return Err(AgentError::Refused(format!(
                    "entity {entity} is running; delete needs force"
                )));
            }
            if let Err(err) = state.control.stop(&record).await {
                warn!(%entity, error = %err, "stop before forced delete failed");
            }
        }
        state.store.remove(&entity)?;
        info!(%entity, "entity deleted");
        Ok(format!("entity {entity} deleted"))
    }
    .await;
    match reply {
        Ok(msg) => Json(RpcResponse::success(msg)),
        Err(err) => Json(envelope_err(&entity, "delete", err)),
    }
}

async fn start_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply: AgentResult<()> = async {
        let record = state.record(&entity)?;
        state.control.start(&record).await
    }
    .await;
    match reply {
        Ok(()) => Json(RpcResponse::success(format!("entity {entity} started"))),
        Err(err) => Json(envelope_err(&entity, "start", err)),
    }
}

async fn stop_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply: AgentResult<()> = async {
        let record = state.record(&entity)?;
        state.control.stop(&record).await
    }
    .await;
    match reply {
        Ok(()) => Json(RpcResponse::success(format!("entity {entity} stopped"))),
        Err(err) => Json(envelope_err(&entity, "stop", err)),
    }
}

async fn status_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply: AgentResult<RpcResponse> = async {
        let record = state.record(&entity)?;
        let running = state.control.status(&record).await?;
        let status = EntityStatus {
            entity: entity.clone(),
            running,
            port: record.port,
        };
        let mut resp = RpcResponse::success_with(format!("entity {entity} status"), &status);
        if running {
            // Channel detail is best effort; a probe must not fail just
            // because the engine refuses a session.
            if let Ok(mut session) = state.session(&record).await {
                if let Ok(channels) = session.replica_channels().await {
                    for channel in &channels {
                        if let Ok(value) = serde_json::to_value(channel) {
                            resp.data.push(value);
                        }
                    }
                }
            }
        }
        Ok(resp)
    }
    .await;
    match reply {
        Ok(resp) => Json(resp),
        Err(err) => Json(envelope_err(&entity, "status", err)),
    }
}

// ── Replication handlers ───────────────────────────────────────────

async fn bond_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(req): Json<BondEntity>,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply = async {
        let record = state.record(&entity)?;
        let mut session = state.session(&record).await?;
        replication::bond(session.as_mut(), &req).await
    }
    .await;
    match reply {
        Ok(outcome) => Json(RpcResponse::success_with(
            format!("entity {entity} bonded to master {}", req.master.database_id),
            &outcome,
        )),
        Err(err) => Json(envelope_err(&entity, "bond", err)),
    }
}

async fn unbond_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UnbondEntity>,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply = async {
        let record = state.record(&entity)?;
        let mut session = state.session(&record).await?;
        replication::unbond(session.as_mut(), &req).await
    }
    .await;
    match reply {
        Ok(()) => Json(RpcResponse::success(format!(
            "entity {entity} unbonded from master {}",
            req.master_id
        ))),
        Err(err) => Json(envelope_err(&entity, "unbond", err)),
    }
}

async fn slave_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SlaveEntity>,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply = async {
        let record = state.record(&entity)?;
        let mut session = state.session(&record).await?;
        replication::grant(session.as_mut(), &req).await
    }
    .await;
    match reply {
        Ok(outcome) => Json(RpcResponse::success_with(
            format!("entity {entity} granted replication to {}", req.auth.user),
            &outcome,
        )),
        Err(err) => Json(envelope_err(&entity, "slave", err)),
    }
}

async fn replication_ready(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ReplicationReady>,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply = async {
        let record = state.record(&entity)?;
        let mut session = state.session(&record).await?;
        replication::ready(session.as_mut(), &req).await
    }
    .await;
    match reply {
        Ok(probe) => Json(RpcResponse::success_with(
            format!("entity {entity} replication ready"),
            &probe,
        )),
        Err(err) => Json(envelope_err(&entity, "ready", err)),
    }
}

async fn revoke_entity(
    State(state): State<AgentState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RevokeEntity>,
) -> Json<RpcResponse> {
    let deadline = deadline_from(&headers);
    let Some(_guard) = state.locks.acquire(&entity, deadline.lock_wait()).await else {
        return Json(RpcResponse::locked(format!("entity {entity} busy")));
    };
    let reply = async {
        let record = state.record(&entity)?;
        let mut session = state.session(&record).await?;
        replication::revoke(session.as_mut(), &req).await
    }
    .await;
    match reply {
        Ok(()) => Json(RpcResponse::success(format!(
            "entity {entity} revoked user {}",
            req.user
        ))),
        Err(err) => Json(envelope_err(&entity, "revoke", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeControl, ScriptedFactory, ScriptedSession};
    use dbfleet_mysql::ReplicaChannel;
    use dbfleet_rpc::wire::{BondOutcome, MasterSide, ResultCode};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn state_with(session: ScriptedSession, running: bool) -> (AgentState, Arc<AtomicBool>) {
        let store = EntityStore::open_in_memory().unwrap();
        let control = FakeControl::new(running);
        let flag = control.running.clone();
        let state = AgentState::new(
            store,
            Arc::new(control),
            Arc::new(ScriptedFactory::new(session)),
        );
        (state, flag)
    }

    fn seed(state: &AgentState, entity: &str) {
        state
            .store
            .put(&EntityRecord::new(entity, 3310, None, "root", "secret"))
            .unwrap();
    }

    fn create_req(entity: &str, port: u16, start: bool) -> CreateEntity {
        CreateEntity {
            entity: entity.to_string(),
            port,
            socket: None,
            user: "root".to_string(),
            passwd: "secret".to_string(),
            start,
        }
    }

    #[tokio::test]
    async fn create_assigns_port_and_starts() {
        let (state, running) = state_with(ScriptedSession::new(), false);

        let Json(resp) = create_entity(
            State(state.clone()),
            Path("dbf-3".to_string()),
            HeaderMap::new(),
            Json(create_req("dbf-3", 0, true)),
        )
        .await;

        assert!(resp.is_success());
        let address: EntityAddress = resp.first().unwrap();
        assert_ne!(address.port, 0);
        assert!(running.load(Ordering::SeqCst));
        let record = state.store.get("dbf-3").unwrap().unwrap();
        assert_eq!(record.port, address.port);
    }

    #[tokio::test]
    async fn create_duplicate_refused() {
        let (state, _) = state_with(ScriptedSession::new(), false);
        seed(&state, "dbf-3");

        let Json(resp) = create_entity(
            State(state),
            Path("dbf-3".to_string()),
            HeaderMap::new(),
            Json(create_req("dbf-3", 3310, false)),
        )
        .await;

        assert_eq!(resp.resultcode, ResultCode::Error);
        assert!(resp.result.contains("already exists"));
    }

    #[tokio::test]
    async fn create_start_failure_keeps_record() {
        let store = EntityStore::open_in_memory().unwrap();
        let control = FakeControl::new(false).failing_start();
        let state = AgentState::new(
            store,
            Arc::new(control),
            Arc::new(ScriptedFactory::new(ScriptedSession::new())),
        );

        let Json(resp) = create_entity(
            State(state.clone()),
            Path("dbf-3".to_string()),
            HeaderMap::new(),
            Json(create_req("dbf-3", 3310, true)),
        )
        .await;

        assert_eq!(resp.resultcode, ResultCode::Error);
        assert!(state.store.get("dbf-3").unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_absent_is_success() {
        let (state, _) = state_with(ScriptedSession::new(), false);

        let Json(resp) = delete_entity(
            State(state),
            Path("dbf-9".to_string()),
            HeaderMap::new(),
            Json(DeleteEntity::default()),
        )
        .await;

        assert!(resp.is_success());
        assert!(resp.result.contains("already absent"));
    }

    #[tokio::test]
    async fn delete_running_needs_force() {
        let (state, running) = state_with(ScriptedSession::new(), true);
        seed(&state, "dbf-3");

        let Json(resp) = delete_entity(
            State(state.clone()),
            Path("dbf-3".to_string()),
            HeaderMap::new(),
            Json(DeleteEntity { force: false }),
        )
        .await;
        assert_eq!(resp.resultcode, ResultCode::Error);
        assert!(state.store.get("dbf-3").unwrap().is_some());

        let Json(resp) = delete_entity(
            State(state.clone()),
            Path("dbf-3".to_string()),
            HeaderMap::new(),
            Json(DeleteEntity { force: true }),
        )
        .await;
        assert!(resp.is_success());
        assert!(!running.load(Ordering::SeqCst));
        assert!(state.store.get("dbf-3").unwrap().is_none());
    }

    #[tokio::test]
    async fn bond_answers_outcome_payload() {
        let session = ScriptedSession::new();
        let (state, _) = state_with(session.clone(), true);
        seed(&state, "dbf-7");

        let req = BondEntity {
            master: MasterSide {
                database_id: 3,
                host: "10.0.0.5".to_string(),
                port: 3306,
                repl_user: "repluser-7".to_string(),
                repl_passwd: "repl-abcdef".to_string(),
                file: None,
                position: None,
                schemas: Vec::new(),
            },
            force: false,
        };
        let Json(resp) = bond_entity(
            State(state),
            Path("dbf-7".to_string()),
            HeaderMap::new(),
            Json(req),
        )
        .await;

        assert!(resp.is_success());
        let outcome: BondOutcome = resp.first().unwrap();
        assert_eq!(outcome.channel, "masterdb-3");
        assert!(outcome.started);
        assert!(session
            .calls()
            .contains(&"change_master masterdb-3 10.0.0.5:3306".to_string()));
    }

    #[tokio::test]
    async fn bond_unknown_entity_is_error() {
        let (state, _) = state_with(ScriptedSession::new(), true);

        let req = BondEntity {
            master: MasterSide {
                database_id: 3,
                host: "10.0.0.5".to_string(),
                port: 3306,
                repl_user: "repluser-7".to_string(),
                repl_passwd: "repl-abcdef".to_string(),
                file: None,
                position: None,
                schemas: Vec::new(),
            },
            force: false,
        };
        let Json(resp) = bond_entity(
            State(state),
            Path("dbf-404".to_string()),
            HeaderMap::new(),
            Json(req),
        )
        .await;

        assert_eq!(resp.resultcode, ResultCode::Error);
        assert!(resp.result.contains("not found"));
    }

    #[tokio::test]
    async fn busy_entity_answers_locked() {
        let (state, _) = state_with(ScriptedSession::new(), false);
        seed(&state, "dbf-3");
        let _guard = state
            .locks
            .acquire("dbf-3", Duration::from_millis(10))
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(DEADLINE_HEADER, "50".parse().unwrap());
        let Json(resp) = start_entity(State(state), Path("dbf-3".to_string()), headers).await;

        assert!(resp.is_locked());
    }

    #[tokio::test]
    async fn status_reports_running_and_channels() {
        let channel = ReplicaChannel {
            channel: "masterdb-3".to_string(),
            master_host: "10.0.0.5".to_string(),
            master_port: 3306,
            io_running: true,
            sql_running: true,
            master_log_file: "mysql-bin.000002".to_string(),
            read_master_log_pos: 154,
        };
        let (state, _) = state_with(ScriptedSession::new().with_channel(channel), true);
        seed(&state, "dbf-7");

        let Json(resp) =
            status_entity(State(state), Path("dbf-7".to_string()), HeaderMap::new()).await;

        assert!(resp.is_success());
        let status: EntityStatus = resp.first().unwrap();
        assert!(status.running);
        assert_eq!(status.port, 3310);
        // Payload is the status followed by one entry per channel.
        assert_eq!(resp.data.len(), 2);
        let parsed: ReplicaChannel = serde_json::from_value(resp.data[1].clone()).unwrap();
        assert_eq!(parsed.channel, "masterdb-3");
    }

    #[tokio::test]
    async fn ready_refusal_is_error_envelope() {
        let (state, _) = state_with(ScriptedSession::new(), true);
        seed(&state, "dbf-7");

        let req = ReplicationReady {
            master_id: 3,
            host: "10.0.0.5".to_string(),
            port: 3306,
            schemas: Vec::new(),
        };
        let Json(resp) = replication_ready(
            State(state),
            Path("dbf-7".to_string()),
            HeaderMap::new(),
            Json(req),
        )
        .await;

        assert_eq!(resp.resultcode, ResultCode::Error);
        assert!(resp.result.contains("masterdb-3 not found"));
    }

    #[tokio::test]
    async fn revoke_flows_to_engine() {
        let session = ScriptedSession::new();
        let (state, _) = state_with(session.clone(), true);
        seed(&state, "dbf-5");

        let req = RevokeEntity {
            user: "repluser-9".to_string(),
            source: "10.0.0.7".to_string(),
        };
        let Json(resp) = revoke_entity(
            State(state),
            Path("dbf-5".to_string()),
            HeaderMap::new(),
            Json(req),
        )
        .await;

        assert!(resp.is_success());
        assert!(session
            .calls()
            .contains(&"drop_user repluser-9@10.0.0.7".to_string()));
    }
}
