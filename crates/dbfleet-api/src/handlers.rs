//! REST handlers answering the fleet envelope.
//!
//! Handlers delegate to [`DatabaseManager`] and translate its error
//! classes into HTTP statuses: refusals are 400, missing resources 404,
//! lock contention 409, infrastructure faults 500/503.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use dbfleet_catalog::{BackendKind, DatabaseId, QuoteId};
use dbfleet_manager::{
    BondRequest, CreateDatabaseRequest, CreateQuoteRequest, CreateSchemaRequest, ListFilter,
    ManagerError,
};
use dbfleet_rpc::wire::RpcResponse;

use crate::ApiState;

// ── Envelope plumbing ──────────────────────────────────────────────

fn ok(msg: impl Into<String>) -> Response {
    (StatusCode::OK, Json(RpcResponse::success(msg))).into_response()
}

fn ok_with<T: Serialize>(msg: impl Into<String>, payload: &T) -> Response {
    (StatusCode::OK, Json(RpcResponse::success_with(msg, payload))).into_response()
}

fn created_with<T: Serialize>(msg: impl Into<String>, payload: &T) -> Response {
    (
        StatusCode::CREATED,
        Json(RpcResponse::success_with(msg, payload)),
    )
        .into_response()
}

/// Success with one `data` element per item.
fn ok_items<T: Serialize>(msg: impl Into<String>, items: &[T]) -> Response {
    let mut resp = RpcResponse::success(msg);
    resp.data
        .extend(items.iter().filter_map(|item| serde_json::to_value(item).ok()));
    (StatusCode::OK, Json(resp)).into_response()
}

fn failure(err: &ManagerError) -> Response {
    let status = match err {
        ManagerError::Acceptable(_) => StatusCode::BAD_REQUEST,
        ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
        ManagerError::Locked(_) => StatusCode::CONFLICT,
        ManagerError::Rpc(_) => StatusCode::SERVICE_UNAVAILABLE,
        ManagerError::Unacceptable(_) | ManagerError::Catalog(_) | ManagerError::Engine(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    let body = match err {
        ManagerError::Locked(msg) => RpcResponse::locked(msg.clone()),
        other => RpcResponse::error(other.to_string()),
    };
    (status, Json(body)).into_response()
}

// ── Request bodies and queries ─────────────────────────────────────

#[derive(Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub backend: Option<BackendKind>,
    pub dbtype: Option<String>,
}

#[derive(Deserialize)]
pub struct UnbondBody {
    pub master_id: DatabaseId,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct GrantSlaveBody {
    pub slave_id: DatabaseId,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct MarkReadyBody {
    pub slave_id: DatabaseId,
    #[serde(default)]
    pub force: bool,
}

// ── Databases ──────────────────────────────────────────────────────

/// GET /dbfleet/databases
pub async fn list_databases(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let filter = ListFilter {
        backend: query.backend,
        dbtype: query.dbtype,
    };
    match state.manager.list_databases(&filter) {
        Ok(items) => ok_items(format!("{} databases", items.len()), &items),
        Err(err) => failure(&err),
    }
}

/// POST /dbfleet/databases
pub async fn create_database(
    State(state): State<ApiState>,
    Json(req): Json<CreateDatabaseRequest>,
) -> impl IntoResponse {
    match state.manager.create_database(&req).await {
        Ok(inst) => created_with(format!("database {} created", inst.database_id), &inst),
        Err(err) => failure(&err),
    }
}

/// GET /dbfleet/databases/{id}
pub async fn show_database(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
) -> impl IntoResponse {
    match state.manager.show_database(id) {
        Ok(detail) => ok_with(format!("database {id}"), &detail),
        Err(err) => failure(&err),
    }
}

/// DELETE /dbfleet/databases/{id}
pub async fn delete_database(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
    Query(query): Query<ForceQuery>,
) -> impl IntoResponse {
    match state.manager.delete_database(id, query.force).await {
        Ok(()) => ok(format!("database {id} deleted")),
        Err(err) => failure(&err),
    }
}

/// POST /dbfleet/databases/{id}/start
pub async fn start_database(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
) -> impl IntoResponse {
    match state.manager.start_database(id).await {
        Ok(()) => ok(format!("database {id} starting")),
        Err(err) => failure(&err),
    }
}

/// POST /dbfleet/databases/{id}/stop
pub async fn stop_database(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
) -> impl IntoResponse {
    match state.manager.stop_database(id).await {
        Ok(()) => ok(format!("database {id} stopped")),
        Err(err) => failure(&err),
    }
}

/// GET /dbfleet/databases/{id}/status
pub async fn database_status(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
) -> impl IntoResponse {
    match state.manager.database_status(id).await {
        Ok(health) => ok_with(format!("database {id} status"), &health),
        Err(err) => failure(&err),
    }
}

// ── Replication ────────────────────────────────────────────────────

/// POST /dbfleet/databases/{id}/bond ({id} is the slave).
pub async fn bond(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
    Json(req): Json<BondRequest>,
) -> impl IntoResponse {
    match state.manager.replication().bond(id, &req).await {
        Ok(rel) => ok_with(
            format!("database {id} bonded to master {}", rel.master_id),
            &rel,
        ),
        Err(err) => failure(&err),
    }
}

/// POST /dbfleet/databases/{id}/unbond ({id} is the slave).
pub async fn unbond(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
    Json(body): Json<UnbondBody>,
) -> impl IntoResponse {
    match state
        .manager
        .replication()
        .unbond(body.master_id, id, body.force)
        .await
    {
        Ok(()) => ok(format!(
            "database {id} unbonded from master {}",
            body.master_id
        )),
        Err(err) => failure(&err),
    }
}

/// POST /dbfleet/databases/{id}/slave ({id} is the master).
pub async fn grant_slave(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
    Json(body): Json<GrantSlaveBody>,
) -> impl IntoResponse {
    match state
        .manager
        .replication()
        .grant_slave(id, body.slave_id, body.force)
        .await
    {
        Ok(rel) => ok_with(
            format!("database {} bonded to master {id}", body.slave_id),
            &rel,
        ),
        Err(err) => failure(&err),
    }
}

/// POST /dbfleet/databases/{id}/ready ({id} is the master).
pub async fn mark_ready(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
    Json(body): Json<MarkReadyBody>,
) -> impl IntoResponse {
    match state
        .manager
        .replication()
        .mark_ready(id, body.slave_id, body.force)
        .await
    {
        Ok(rel) => ok_with(
            format!("slave {} ready for master {id}", body.slave_id),
            &rel,
        ),
        Err(err) => failure(&err),
    }
}

// ── Schemas ────────────────────────────────────────────────────────

/// POST /dbfleet/databases/{id}/schemas
pub async fn create_schema(
    State(state): State<ApiState>,
    Path(id): Path<DatabaseId>,
    Json(req): Json<CreateSchemaRequest>,
) -> impl IntoResponse {
    match state.manager.create_schema(id, &req).await {
        Ok(schema) => created_with(format!("schema {} created", schema.name), &schema),
        Err(err) => failure(&err),
    }
}

/// GET /dbfleet/databases/{id}/schemas/{name}
pub async fn show_schema(
    State(state): State<ApiState>,
    Path((id, name)): Path<(DatabaseId, String)>,
) -> impl IntoResponse {
    match state.manager.show_schema(id, &name) {
        Ok(schema) => ok_with(format!("schema {name}"), &schema),
        Err(err) => failure(&err),
    }
}

/// DELETE /dbfleet/databases/{id}/schemas/{name}
pub async fn delete_schema(
    State(state): State<ApiState>,
    Path((id, name)): Path<(DatabaseId, String)>,
    Query(query): Query<ForceQuery>,
) -> impl IntoResponse {
    match state.manager.delete_schema(id, &name, query.force).await {
        Ok(()) => ok(format!("schema {name} deleted")),
        Err(err) => failure(&err),
    }
}

// ── Quotes ─────────────────────────────────────────────────────────

/// POST /dbfleet/quotes
pub async fn create_quote(
    State(state): State<ApiState>,
    Json(req): Json<CreateQuoteRequest>,
) -> impl IntoResponse {
    match state.manager.create_quote(&req) {
        Ok(grant) => created_with(format!("quote {} created", grant.quote.quote_id), &grant),
        Err(err) => failure(&err),
    }
}

/// GET /dbfleet/quotes/{quote_id}
pub async fn show_quote(
    State(state): State<ApiState>,
    Path(quote_id): Path<QuoteId>,
) -> impl IntoResponse {
    match state.manager.show_quote(quote_id) {
        Ok(grant) => ok_with(format!("quote {quote_id}"), &grant),
        Err(err) => failure(&err),
    }
}

/// DELETE /dbfleet/quotes/{quote_id}
pub async fn delete_quote(
    State(state): State<ApiState>,
    Path(quote_id): Path<QuoteId>,
) -> impl IntoResponse {
    match state.manager.delete_quote(quote_id) {
        Ok(()) => ok(format!("quote {quote_id} deleted")),
        Err(err) => failure(&err),
    }
}
