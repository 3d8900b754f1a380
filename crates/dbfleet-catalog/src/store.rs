//! CatalogStore — redb-backed catalog persistence for DbFleet.
//!
//! Provides typed CRUD operations over database instances, slave relations,
//! schemas, quotes, static host records, and tasks. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Single reads and writes use the one-shot methods on [`CatalogStore`].
//! Saga steps that must observe and mutate several rows atomically use
//! [`CatalogStore::write`] to obtain a [`CatalogTxn`]: redb admits a single
//! write transaction at a time, so precondition checks done inside the
//! transaction hold until it commits.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `CatalogError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| CatalogError::$variant(e.to_string())
    };
}

/// Thread-safe catalog store backed by redb.
#[derive(Clone)]
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    /// Open (or create) a persistent catalog at the given path.
    pub fn open(path: &Path) -> CatalogResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "catalog opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory catalog (for testing).
    pub fn open_in_memory() -> CatalogResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory catalog opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> CatalogResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DATABASES).map_err(map_err!(Table))?;
        txn.open_table(SLAVE_RELATIONS).map_err(map_err!(Table))?;
        txn.open_table(SCHEMAS).map_err(map_err!(Table))?;
        txn.open_table(QUOTES).map_err(map_err!(Table))?;
        txn.open_table(STATIC_RECORDS).map_err(map_err!(Table))?;
        txn.open_table(TASKS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Allocate the next value of a named counter. Counters start at 1 and
    /// never hand out the same value twice, even when the surrounding saga
    /// later fails.
    pub fn next_id(&self, counter: &str) -> CatalogResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let current = table
                .get(counter)
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0);
            next = current + 1;
            table.insert(counter, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    /// Begin a write transaction for a multi-row saga step.
    pub fn write(&self) -> CatalogResult<CatalogTxn> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        Ok(CatalogTxn { txn })
    }

    // ── Database instances ─────────────────────────────────────────

    /// Insert or update a database instance.
    pub fn put_database(&self, inst: &DatabaseInstance) -> CatalogResult<()> {
        let txn = self.write()?;
        txn.put_database(inst)?;
        txn.commit()?;
        debug!(database_id = inst.database_id, "database stored");
        Ok(())
    }

    /// Get a database instance by id.
    pub fn get_database(&self, database_id: DatabaseId) -> CatalogResult<Option<DatabaseInstance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DATABASES).map_err(map_err!(Table))?;
        match table.get(database_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let inst: DatabaseInstance =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(inst))
            }
            None => Ok(None),
        }
    }

    /// List all database instances.
    pub fn list_databases(&self) -> CatalogResult<Vec<DatabaseInstance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DATABASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let inst: DatabaseInstance =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(inst);
        }
        Ok(results)
    }

    // ── Slave relations ────────────────────────────────────────────

    /// Get the relation row for a (master, slave) pair.
    pub fn get_relation(
        &self,
        master_id: DatabaseId,
        slave_id: DatabaseId,
    ) -> CatalogResult<Option<SlaveRelation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SLAVE_RELATIONS).map_err(map_err!(Table))?;
        match table.get((master_id, slave_id)).map_err(map_err!(Read))? {
            Some(guard) => {
                let rel: SlaveRelation =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rel))
            }
            None => Ok(None),
        }
    }

    /// List all relations where the given instance is the master.
    pub fn relations_for_master(&self, master_id: DatabaseId) -> CatalogResult<Vec<SlaveRelation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SLAVE_RELATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().0 == master_id {
                let rel: SlaveRelation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(rel);
            }
        }
        Ok(results)
    }

    /// List all relations where the given instance is the slave.
    pub fn relations_for_slave(&self, slave_id: DatabaseId) -> CatalogResult<Vec<SlaveRelation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SLAVE_RELATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().1 == slave_id {
                let rel: SlaveRelation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(rel);
            }
        }
        Ok(results)
    }

    // ── Schemas ────────────────────────────────────────────────────

    /// Get a schema row by owning database and name.
    pub fn get_schema(
        &self,
        database_id: DatabaseId,
        name: &str,
    ) -> CatalogResult<Option<SchemaRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCHEMAS).map_err(map_err!(Table))?;
        match table.get((database_id, name)).map_err(map_err!(Read))? {
            Some(guard) => {
                let schema: SchemaRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    /// List all schemas owned by a database.
    pub fn schemas_for_database(&self, database_id: DatabaseId) -> CatalogResult<Vec<SchemaRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCHEMAS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().0 == database_id {
                let schema: SchemaRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(schema);
            }
        }
        Ok(results)
    }

    // ── Quotes ─────────────────────────────────────────────────────

    /// Get a quote by id.
    pub fn get_quote(&self, quote_id: QuoteId) -> CatalogResult<Option<SchemaQuote>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUOTES).map_err(map_err!(Table))?;
        match table.get(quote_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let quote: SchemaQuote =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(quote))
            }
            None => Ok(None),
        }
    }

    /// List quotes served by the given instance (as qdatabase).
    pub fn quotes_for_qdatabase(&self, qdatabase_id: DatabaseId) -> CatalogResult<Vec<SchemaQuote>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUOTES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let quote: SchemaQuote =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if quote.qdatabase_id == qdatabase_id {
                results.push(quote);
            }
        }
        Ok(results)
    }

    /// List quotes holding the given schema.
    pub fn quotes_for_schema(&self, schema_id: SchemaId) -> CatalogResult<Vec<SchemaQuote>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUOTES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let quote: SchemaQuote =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if quote.schema_id == schema_id {
                results.push(quote);
            }
        }
        Ok(results)
    }

    // ── Static host records ────────────────────────────────────────

    /// Insert or update a static host record.
    pub fn put_static_record(&self, record: &StaticRecord) -> CatalogResult<()> {
        let txn = self.write()?;
        txn.put_static_record(record)?;
        txn.commit()
    }

    /// Get a static host record by id.
    pub fn get_static_record(&self, record_id: RecordId) -> CatalogResult<Option<StaticRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATIC_RECORDS).map_err(map_err!(Table))?;
        match table.get(record_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: StaticRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all static host records.
    pub fn list_static_records(&self) -> CatalogResult<Vec<StaticRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATIC_RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: StaticRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Tasks ──────────────────────────────────────────────────────

    /// Insert or update a task.
    pub fn put_task(&self, task: &FleetTask) -> CatalogResult<()> {
        let txn = self.write()?;
        txn.put_task(task)?;
        txn.commit()
    }

    /// Get a task by id.
    pub fn get_task(&self, task_id: TaskId) -> CatalogResult<Option<FleetTask>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        match table.get(task_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let task: FleetTask =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// List tasks runnable at `now`: pending, or running rows left behind by
    /// a crashed control plane, whose `not_before` has passed.
    pub fn due_tasks(&self, now: u64) -> CatalogResult<Vec<FleetTask>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let task: FleetTask =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            let runnable =
                matches!(task.status, TaskStatus::Pending | TaskStatus::Running);
            if runnable && task.not_before <= now {
                results.push(task);
            }
        }
        Ok(results)
    }
}

// ── Write transactions ─────────────────────────────────────────────

/// A catalog write transaction. Dropping it without [`CatalogTxn::commit`]
/// aborts every change, which is how sagas discard partial work.
pub struct CatalogTxn {
    txn: redb::WriteTransaction,
}

impl CatalogTxn {
    /// Commit the transaction.
    pub fn commit(self) -> CatalogResult<()> {
        self.txn.commit().map_err(map_err!(Transaction))
    }

    // ── Database instances ─────────────────────────────────────────

    pub fn database(&self, database_id: DatabaseId) -> CatalogResult<Option<DatabaseInstance>> {
        let table = self.txn.open_table(DATABASES).map_err(map_err!(Table))?;
        match table.get(database_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let inst: DatabaseInstance =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(inst))
            }
            None => Ok(None),
        }
    }

    /// Insert a new instance. Fails on id reuse or on a (backend, locator)
    /// pair already taken.
    pub fn insert_database(&self, inst: &DatabaseInstance) -> CatalogResult<()> {
        let value = serde_json::to_vec(inst).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(DATABASES).map_err(map_err!(Table))?;
        if table.get(inst.database_id).map_err(map_err!(Read))?.is_some() {
            return Err(CatalogError::Conflict(format!(
                "database {} already exists",
                inst.database_id
            )));
        }
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, existing) = entry.map_err(map_err!(Read))?;
            let existing: DatabaseInstance =
                serde_json::from_slice(existing.value()).map_err(map_err!(Deserialize))?;
            if existing.backend == inst.backend && existing.locator == inst.locator {
                return Err(CatalogError::Conflict(format!(
                    "locator {} already registered for backend {}",
                    inst.locator, inst.backend
                )));
            }
        }
        table
            .insert(inst.database_id, value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Insert or update an instance.
    pub fn put_database(&self, inst: &DatabaseInstance) -> CatalogResult<()> {
        let value = serde_json::to_vec(inst).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(DATABASES).map_err(map_err!(Table))?;
        table
            .insert(inst.database_id, value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Delete an instance row. Returns true if it existed.
    pub fn remove_database(&self, database_id: DatabaseId) -> CatalogResult<bool> {
        let mut table = self.txn.open_table(DATABASES).map_err(map_err!(Table))?;
        Ok(table.remove(database_id).map_err(map_err!(Write))?.is_some())
    }

    // ── Slave relations ────────────────────────────────────────────

    pub fn relation(
        &self,
        master_id: DatabaseId,
        slave_id: DatabaseId,
    ) -> CatalogResult<Option<SlaveRelation>> {
        let table = self
            .txn
            .open_table(SLAVE_RELATIONS)
            .map_err(map_err!(Table))?;
        match table.get((master_id, slave_id)).map_err(map_err!(Read))? {
            Some(guard) => {
                let rel: SlaveRelation =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rel))
            }
            None => Ok(None),
        }
    }

    pub fn put_relation(&self, rel: &SlaveRelation) -> CatalogResult<()> {
        let value = serde_json::to_vec(rel).map_err(map_err!(Serialize))?;
        let mut table = self
            .txn
            .open_table(SLAVE_RELATIONS)
            .map_err(map_err!(Table))?;
        table
            .insert(rel.table_key(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    pub fn remove_relation(
        &self,
        master_id: DatabaseId,
        slave_id: DatabaseId,
    ) -> CatalogResult<bool> {
        let mut table = self
            .txn
            .open_table(SLAVE_RELATIONS)
            .map_err(map_err!(Table))?;
        Ok(table
            .remove((master_id, slave_id))
            .map_err(map_err!(Write))?
            .is_some())
    }

    pub fn relations_for_master(&self, master_id: DatabaseId) -> CatalogResult<Vec<SlaveRelation>> {
        let table = self
            .txn
            .open_table(SLAVE_RELATIONS)
            .map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().0 == master_id {
                let rel: SlaveRelation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(rel);
            }
        }
        Ok(results)
    }

    pub fn relations_for_slave(&self, slave_id: DatabaseId) -> CatalogResult<Vec<SlaveRelation>> {
        let table = self
            .txn
            .open_table(SLAVE_RELATIONS)
            .map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().1 == slave_id {
                let rel: SlaveRelation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(rel);
            }
        }
        Ok(results)
    }

    // ── Schemas ────────────────────────────────────────────────────

    pub fn schema(
        &self,
        database_id: DatabaseId,
        name: &str,
    ) -> CatalogResult<Option<SchemaRecord>> {
        let table = self.txn.open_table(SCHEMAS).map_err(map_err!(Table))?;
        match table.get((database_id, name)).map_err(map_err!(Read))? {
            Some(guard) => {
                let schema: SchemaRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    /// Insert a new schema row. Fails if the name is taken on this database.
    pub fn insert_schema(&self, schema: &SchemaRecord) -> CatalogResult<()> {
        let value = serde_json::to_vec(schema).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(SCHEMAS).map_err(map_err!(Table))?;
        if table
            .get(schema.table_key())
            .map_err(map_err!(Read))?
            .is_some()
        {
            return Err(CatalogError::Conflict(format!(
                "schema {} already exists on database {}",
                schema.name, schema.database_id
            )));
        }
        table
            .insert(schema.table_key(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    pub fn remove_schema(&self, database_id: DatabaseId, name: &str) -> CatalogResult<bool> {
        let mut table = self.txn.open_table(SCHEMAS).map_err(map_err!(Table))?;
        Ok(table
            .remove((database_id, name))
            .map_err(map_err!(Write))?
            .is_some())
    }

    pub fn schemas_for_database(&self, database_id: DatabaseId) -> CatalogResult<Vec<SchemaRecord>> {
        let table = self.txn.open_table(SCHEMAS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().0 == database_id {
                let schema: SchemaRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(schema);
            }
        }
        Ok(results)
    }

    // ── Quotes ─────────────────────────────────────────────────────

    pub fn quote(&self, quote_id: QuoteId) -> CatalogResult<Option<SchemaQuote>> {
        let table = self.txn.open_table(QUOTES).map_err(map_err!(Table))?;
        match table.get(quote_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let quote: SchemaQuote =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(quote))
            }
            None => Ok(None),
        }
    }

    pub fn put_quote(&self, quote: &SchemaQuote) -> CatalogResult<()> {
        let value = serde_json::to_vec(quote).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(QUOTES).map_err(map_err!(Table))?;
        table
            .insert(quote.quote_id, value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    pub fn remove_quote(&self, quote_id: QuoteId) -> CatalogResult<bool> {
        let mut table = self.txn.open_table(QUOTES).map_err(map_err!(Table))?;
        Ok(table.remove(quote_id).map_err(map_err!(Write))?.is_some())
    }

    pub fn quotes_for_schema(&self, schema_id: SchemaId) -> CatalogResult<Vec<SchemaQuote>> {
        let table = self.txn.open_table(QUOTES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let quote: SchemaQuote =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if quote.schema_id == schema_id {
                results.push(quote);
            }
        }
        Ok(results)
    }

    pub fn quotes_for_qdatabase(&self, qdatabase_id: DatabaseId) -> CatalogResult<Vec<SchemaQuote>> {
        let table = self.txn.open_table(QUOTES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let quote: SchemaQuote =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if quote.qdatabase_id == qdatabase_id {
                results.push(quote);
            }
        }
        Ok(results)
    }

    // ── Static host records ────────────────────────────────────────

    pub fn static_record(&self, record_id: RecordId) -> CatalogResult<Option<StaticRecord>> {
        let table = self
            .txn
            .open_table(STATIC_RECORDS)
            .map_err(map_err!(Table))?;
        match table.get(record_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: StaticRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn put_static_record(&self, record: &StaticRecord) -> CatalogResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let mut table = self
            .txn
            .open_table(STATIC_RECORDS)
            .map_err(map_err!(Table))?;
        table
            .insert(record.record_id, value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// List unreserved, unbound records in a zone.
    pub fn free_static_records(&self, zone: &str) -> CatalogResult<Vec<StaticRecord>> {
        let table = self
            .txn
            .open_table(STATIC_RECORDS)
            .map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: StaticRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.zone == zone && !record.reserved && record.database_id.is_none() {
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Tasks ──────────────────────────────────────────────────────

    pub fn task(&self, task_id: TaskId) -> CatalogResult<Option<FleetTask>> {
        let table = self.txn.open_table(TASKS).map_err(map_err!(Table))?;
        match table.get(task_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let task: FleetTask =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    pub fn put_task(&self, task: &FleetTask) -> CatalogResult<()> {
        let value = serde_json::to_vec(task).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(TASKS).map_err(map_err!(Table))?;
        table
            .insert(task.task_id, value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }
}
