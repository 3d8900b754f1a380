//! Error types for engine sessions.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while talking to a database engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A mysql_async error (connection, protocol, or server-side).
    #[error(transparent)]
    MySql(#[from] mysql_async::Error),

    #[error("invalid system setting '{setting}': expected '{expected}', got '{actual}'")]
    InvalidSystemSetting {
        setting: String,
        expected: String,
        actual: String,
    },

    #[error("replica channel not found: {0}")]
    ChannelNotFound(String),

    #[error("malformed replica status row: {0}")]
    MalformedStatus(String),
}
