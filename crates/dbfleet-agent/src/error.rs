//! Agent-side errors.
//!
//! Handlers fold these into the RPC envelope: [`AgentError::Busy`] becomes
//! the `locked` resultcode, everything else becomes `error` with the
//! Display text as the diagnostic.

use thiserror::Error;

use dbfleet_mysql::EngineError;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors raised while operating on an entity.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The operation was refused; the message says why and what would
    /// let it through (force, different arguments, waiting).
    #[error("{0}")]
    Refused(String),

    #[error("entity {0} not found")]
    UnknownEntity(String),

    #[error("entity {0} busy")]
    Busy(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("entity store: {0}")]
    Store(String),

    #[error("engine control: {0}")]
    Control(String),
}
