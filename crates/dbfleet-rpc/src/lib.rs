//! dbfleet-rpc — the wire protocol between the control plane and its agents.
//!
//! Three pieces:
//!
//! * [`wire`] — the shared envelope ([`RpcResponse`]) plus the request and
//!   payload bodies for every entity RPC. The agent server builds these;
//!   the control plane decodes them.
//! * [`client`] — [`AgentClient`], a hyper http1 client implementing
//!   [`AgentCall`], each call bounded by the operation [`Deadline`].
//! * [`error`] — transport errors. Domain failures ride inside a decoded
//!   envelope; an [`RpcError`] always means infrastructure trouble.

pub mod client;
pub mod error;
pub mod wire;

pub use client::{
    AgentCall, AgentClient, DEADLINE_HEADER, DEFAULT_LOCK_WAIT, DEFAULT_OP_BUDGET, Deadline,
};
pub use error::{RpcError, RpcResult};
pub use wire::{
    BondEntity, BondOutcome, CreateEntity, DeleteEntity, EntityAddress, EntityStatus,
    GrantOutcome, MasterSide, ReadyProbe, ReplicationReady, ResultCode, RevokeEntity,
    RpcResponse, SlaveEntity, UnbondEntity,
};
