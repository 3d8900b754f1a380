//! RPC transport errors.
//!
//! Everything here is infrastructure: the agent could not be reached, the
//! exchange broke, or the operation budget ran out. Domain failures travel
//! inside a decoded envelope, never as an [`RpcError`].

use std::time::Duration;

use thiserror::Error;

/// Result type alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors raised by the RPC client.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("agent {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http exchange with agent {addr} failed: {source}")]
    Http {
        addr: String,
        #[source]
        source: hyper::Error,
    },

    #[error("building rpc request: {0}")]
    Request(#[from] http::Error),

    #[error("encoding rpc body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("agent {addr} answered http {status}")]
    Status { addr: String, status: u16 },

    #[error("malformed envelope from agent {addr}: {source}")]
    Envelope {
        addr: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed agent payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("rpc to agent {addr} timed out")]
    Timeout { addr: String },

    #[error("operation budget of {0:?} exhausted")]
    DeadlineExhausted(Duration),
}
