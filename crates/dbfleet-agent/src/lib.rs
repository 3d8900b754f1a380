//! dbfleet-agent — the per-host agent of the DbFleet control plane.
//!
//! One agent runs next to the database engines it hosts. It keeps a small
//! [`store::EntityStore`] of the entities it owns, drives the engine
//! processes through [`control::EngineControl`], and executes the
//! replication primitives ([`replication`]) against local engine sessions.
//!
//! The control plane talks to it over the JSON RPC surface in [`server`]:
//! every response is an envelope with a `resultcode`, and every operation
//! holds the entity's lock ([`locks::EntityLocks`]) while it runs.

pub mod control;
pub mod error;
pub mod locks;
pub mod replication;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use control::{CommandControl, EngineControl};
pub use error::{AgentError, AgentResult};
pub use locks::EntityLocks;
pub use server::{build_router, AgentState};
pub use store::{EntityRecord, EntityStore};
