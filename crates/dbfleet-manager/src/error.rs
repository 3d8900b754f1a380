//! Control-plane error taxonomy.
//!
//! The variants sort failures by who can act on them: `Acceptable` is the
//! caller's to fix (different arguments, force, waiting), `NotFound` names
//! a missing row, `Locked` a busy entity worth retrying, `Unacceptable` a
//! catalog or topology inconsistency an operator must look at, and the
//! `#[from]` variants wrap infrastructure trouble from the layers below.

use thiserror::Error;

use dbfleet_catalog::CatalogError;
use dbfleet_mysql::EngineError;
use dbfleet_rpc::error::RpcError;
use dbfleet_rpc::wire::{ResultCode, RpcResponse};

/// Result type alias for control-plane operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors raised by control-plane sagas and replication operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Precondition failure the caller can fix.
    #[error("{0}")]
    Acceptable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// An agent entity lock was busy.
    #[error("locked: {0}")]
    Locked(String),

    /// Catalog or topology inconsistency.
    #[error("{0}")]
    Unacceptable(String),

    /// Agent unreachable, deadline exhausted, or a malformed envelope.
    #[error("agent rpc failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Fold an agent envelope whose refusals the caller can cure: with force,
/// different arguments, or by waiting (bond, unbond, readiness probes).
pub(crate) fn envelope_client(resp: RpcResponse) -> ManagerResult<RpcResponse> {
    match resp.resultcode {
        ResultCode::Success => Ok(resp),
        ResultCode::Locked => Err(ManagerError::Locked(resp.result)),
        ResultCode::Error => Err(ManagerError::Acceptable(resp.result)),
    }
}

/// Fold an agent envelope whose refusals mean engine or host trouble the
/// caller cannot fix (grants, lifecycle operations).
pub(crate) fn envelope_engine(resp: RpcResponse) -> ManagerResult<RpcResponse> {
    match resp.resultcode {
        ResultCode::Success => Ok(resp),
        ResultCode::Locked => Err(ManagerError::Locked(resp.result)),
        ResultCode::Error => Err(ManagerError::Unacceptable(resp.result)),
    }
}
