//! Entity store — which entities this agent hosts.
//!
//! A single redb table keyed by entity name, persisted across agent
//! restarts so a rebooted agent still answers for its entities.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, AgentResult};

const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

fn store_err(e: impl std::fmt::Display) -> AgentError {
    AgentError::Store(e.to_string())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One hosted database entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: String,
    pub port: u16,
    /// Administrative unix socket, when the engine exposes one.
    pub socket: Option<String>,
    pub user: String,
    pub passwd: String,
    pub created: u64,
}

impl EntityRecord {
    pub fn new(
        entity: impl Into<String>,
        port: u16,
        socket: Option<String>,
        user: impl Into<String>,
        passwd: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            port,
            socket,
            user: user.into(),
            passwd: passwd.into(),
            created: epoch_secs(),
        }
    }
}

/// Persistent registry of hosted entities.
#[derive(Clone)]
pub struct EntityStore {
    db: Arc<Database>,
}

impl EntityStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> AgentResult<Self> {
        let db = Database::create(path).map_err(store_err)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "entity store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> AgentResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(store_err)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> AgentResult<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        txn.open_table(ENTITIES).map_err(store_err)?;
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn put(&self, record: &EntityRecord) -> AgentResult<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(ENTITIES).map_err(store_err)?;
            let value = serde_json::to_vec(record).map_err(store_err)?;
            table
                .insert(record.entity.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get(&self, entity: &str) -> AgentResult<Option<EntityRecord>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(ENTITIES).map_err(store_err)?;
        match table.get(entity).map_err(store_err)? {
            Some(guard) => {
                let record = serde_json::from_slice(guard.value()).map_err(store_err)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Remove an entity, returning the removed record if it existed.
    pub fn remove(&self, entity: &str) -> AgentResult<Option<EntityRecord>> {
        let txn = self.db.begin_write().map_err(store_err)?;
        let removed;
        {
            let mut table = txn.open_table(ENTITIES).map_err(store_err)?;
            removed = match table.remove(entity).map_err(store_err)? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(store_err)?)
                }
                None => None,
            };
        }
        txn.commit().map_err(store_err)?;
        Ok(removed)
    }

    pub fn list(&self) -> AgentResult<Vec<EntityRecord>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(ENTITIES).map_err(store_err)?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, value) = entry.map_err(store_err)?;
            records.push(serde_json::from_slice(value.value()).map_err(store_err)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entity: &str, port: u16) -> EntityRecord {
        EntityRecord::new(entity, port, None, "root", "secret")
    }

    #[test]
    fn put_get_remove() {
        let store = EntityStore::open_in_memory().unwrap();
        store.put(&record("db-1", 3307)).unwrap();

        let got = store.get("db-1").unwrap().unwrap();
        assert_eq!(got.port, 3307);
        assert_eq!(got.user, "root");

        let removed = store.remove("db-1").unwrap();
        assert!(removed.is_some());
        assert!(store.get("db-1").unwrap().is_none());
    }

    #[test]
    fn remove_missing_is_none() {
        let store = EntityStore::open_in_memory().unwrap();
        assert!(store.remove("db-9").unwrap().is_none());
    }

    #[test]
    fn list_returns_all() {
        let store = EntityStore::open_in_memory().unwrap();
        store.put(&record("db-1", 3307)).unwrap();
        store.put(&record("db-2", 3308)).unwrap();

        let records = store.list().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn put_overwrites() {
        let store = EntityStore::open_in_memory().unwrap();
        store.put(&record("db-1", 3307)).unwrap();
        store.put(&record("db-1", 3309)).unwrap();

        let got = store.get("db-1").unwrap().unwrap();
        assert_eq!(got.port, 3309);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.redb");

        {
            let store = EntityStore::open(&path).unwrap();
            store
                .put(&EntityRecord::new(
                    "db-1",
                    3307,
                    Some("/var/run/db-1.sock".to_string()),
                    "root",
                    "secret",
                ))
                .unwrap();
        }

        let store = EntityStore::open(&path).unwrap();
        let got = store.get("db-1").unwrap().unwrap();
        assert_eq!(got.socket.as_deref(), Some("/var/run/db-1.sock"));
    }
}
