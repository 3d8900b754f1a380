//! dbfleet-catalog — embedded catalog for the DbFleet control plane.
//!
//! Backed by [redb](https://docs.rs/redb), tracks every database instance in
//! the fleet together with its schemas, consumer quotes, master/slave
//! relations, static host records, and pending control-plane tasks.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Numeric identifiers come from a counters table and are never reused;
//! relation rows are keyed by `(master_id, slave_id)` pairs, schema rows by
//! `(database_id, name)`.
//!
//! The `CatalogStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks. Multi-row saga
//! steps go through [`store::CatalogTxn`], which rides a single redb write
//! transaction: redb admits one writer at a time, so a saga that re-checks
//! its preconditions inside the transaction cannot race another writer.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{CatalogError, CatalogResult};
pub use store::{CatalogStore, CatalogTxn};
pub use types::*;
