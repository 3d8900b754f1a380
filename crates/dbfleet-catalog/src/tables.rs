//! redb table definitions for the DbFleet catalog.
//!
//! Values are JSON-serialized domain types in `&[u8]` columns. Child rows
//! use composite keys (`(master_id, slave_id)`, `(database_id, name)`) so a
//! parent's rows can be picked out of an ordered scan.

use redb::TableDefinition;

/// Database instances keyed by `database_id`.
pub const DATABASES: TableDefinition<u64, &[u8]> = TableDefinition::new("databases");

/// Master/slave replication relations keyed by `(master_id, slave_id)`.
pub const SLAVE_RELATIONS: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("slave_relations");

/// Schemas keyed by `(database_id, schema_name)`.
pub const SCHEMAS: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("schemas");

/// Consumer quotes keyed by `quote_id`.
pub const QUOTES: TableDefinition<u64, &[u8]> = TableDefinition::new("quotes");

/// Static host records for the static-record backend, keyed by `record_id`.
pub const STATIC_RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("static_records");

/// Pending control-plane tasks keyed by `task_id`.
pub const TASKS: TableDefinition<u64, &[u8]> = TableDefinition::new("tasks");

/// Monotonic id counters keyed by counter name.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
