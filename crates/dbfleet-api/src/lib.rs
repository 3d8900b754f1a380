//! dbfleet-api — REST façade for the fleet control plane.
//!
//! Every response carries the fleet envelope (`resultcode` / `result` /
//! `data`); the HTTP status reflects the error class.
//!
//! # Routes
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | GET | `/dbfleet/databases` | List databases |
//! | POST | `/dbfleet/databases` | Create a database |
//! | GET | `/dbfleet/databases/{id}` | Show one database |
//! | DELETE | `/dbfleet/databases/{id}` | Delete (force query) |
//! | POST | `/dbfleet/databases/{id}/start` | Start the engine |
//! | POST | `/dbfleet/databases/{id}/stop` | Stop the engine |
//! | GET | `/dbfleet/databases/{id}/status` | Process + channel status |
//! | POST | `/dbfleet/databases/{id}/bond` | Bond slave `{id}` to a master |
//! | POST | `/dbfleet/databases/{id}/unbond` | Unbond slave `{id}` |
//! | POST | `/dbfleet/databases/{id}/slave` | Grant + bond against master `{id}` |
//! | POST | `/dbfleet/databases/{id}/ready` | Verify and mark a relation ready |
//! | POST | `/dbfleet/databases/{id}/schemas` | Create a schema |
//! | GET | `/dbfleet/databases/{id}/schemas/{name}` | Show a schema |
//! | DELETE | `/dbfleet/databases/{id}/schemas/{name}` | Delete a schema (force query) |
//! | POST | `/dbfleet/quotes` | Create a consumption quote |
//! | GET | `/dbfleet/quotes/{quote_id}` | Show a quote |
//! | DELETE | `/dbfleet/quotes/{quote_id}` | Delete a quote |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use dbfleet_manager::DatabaseManager;

/// Shared state for the REST handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<DatabaseManager>,
}

/// Build the control-plane router, mounted under `/dbfleet`.
pub fn build_router(manager: Arc<DatabaseManager>) -> Router {
    let state = ApiState { manager };

    let routes = Router::new()
        .route(
            "/databases",
            get(handlers::list_databases).post(handlers::create_database),
        )
        .route(
            "/databases/{id}",
            get(handlers::show_database).delete(handlers::delete_database),
        )
        .route("/databases/{id}/start", post(handlers::start_database))
        .route("/databases/{id}/stop", post(handlers::stop_database))
        .route("/databases/{id}/status", get(handlers::database_status))
        .route("/databases/{id}/bond", post(handlers::bond))
        .route("/databases/{id}/unbond", post(handlers::unbond))
        .route("/databases/{id}/slave", post(handlers::grant_slave))
        .route("/databases/{id}/ready", post(handlers::mark_ready))
        .route("/databases/{id}/schemas", post(handlers::create_schema))
        .route(
            "/databases/{id}/schemas/{name}",
            get(handlers::show_schema).delete(handlers::delete_schema),
        )
        .route("/quotes", post(handlers::create_quote))
        .route(
            "/quotes/{quote_id}",
            get(handlers::show_quote).delete(handlers::delete_quote),
        )
        .with_state(state);

    Router::new().nest("/dbfleet", routes)
}
