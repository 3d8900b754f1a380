//! Engine sessions: the trait the control plane and agents drive, plus the
//! `mysql_async` implementation.
//!
//! Replication primitives and schema maintenance both funnel through
//! [`EngineSession`] so tests can substitute a scripted fake. The real
//! session is a thin translation onto statements from [`crate::channel`];
//! it holds no state beyond the connection.

use async_trait::async_trait;
use mysql_async::prelude::{FromValue, Queryable};
use mysql_async::{Conn, OptsBuilder, Row};

use crate::channel::{
    BinlogCoords, ReplAuth, ReplicaChannel, change_master_stmt, create_schema_stmt,
    create_user_stmt, drop_schema_stmt, drop_user_stmt, grant_replication_stmt,
    grant_schema_stmt, reset_slave_stmt, start_slave_stmt, stop_slave_stmt,
};
use crate::error::{EngineError, EngineResult};

/// Schemas owned by the engine itself, never counted as user data.
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "performance_schema", "sys", "mysql"];

/// Whether a schema belongs to the engine rather than a user.
pub fn is_system_schema(name: &str) -> bool {
    SYSTEM_SCHEMAS.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Where and how to open an engine session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    /// Administrative unix socket; used when connecting to a local engine.
    pub socket: Option<String>,
    pub user: String,
    pub passwd: String,
}

/// Engine operations the bonding protocol and schema maintenance need.
#[async_trait]
pub trait EngineSession: Send {
    /// All replica channels currently configured (`SHOW SLAVE STATUS`).
    async fn replica_channels(&mut self) -> EngineResult<Vec<ReplicaChannel>>;

    async fn change_master(
        &mut self,
        channel: &str,
        host: &str,
        port: u16,
        auth: &ReplAuth,
        coords: Option<&BinlogCoords>,
    ) -> EngineResult<()>;

    async fn start_slave(&mut self, channel: &str) -> EngineResult<()>;

    async fn stop_slave(&mut self, channel: &str) -> EngineResult<()>;

    async fn reset_slave(&mut self, channel: &str, all: bool) -> EngineResult<()>;

    /// User schema names, system schemas filtered out.
    async fn schema_names(&mut self) -> EngineResult<Vec<String>>;

    /// Whether the binary log is on (`@@log_bin`).
    async fn binlog_enabled(&mut self) -> EngineResult<bool>;

    /// Current binlog coordinates (`SHOW MASTER STATUS`).
    async fn master_coords(&mut self) -> EngineResult<BinlogCoords>;

    async fn reset_master(&mut self) -> EngineResult<()>;

    async fn create_user(&mut self, user: &str, source: &str, passwd: &str) -> EngineResult<()>;

    async fn grant_replication(&mut self, user: &str, source: &str) -> EngineResult<()>;

    async fn grant_schema(
        &mut self,
        privileges: &str,
        schema: &str,
        user: &str,
        source: &str,
    ) -> EngineResult<()>;

    async fn drop_user(&mut self, user: &str, source: &str) -> EngineResult<()>;

    async fn create_schema(
        &mut self,
        name: &str,
        character_set: Option<&str>,
        collation: Option<&str>,
    ) -> EngineResult<()>;

    async fn drop_schema(&mut self, name: &str) -> EngineResult<()>;
}

/// Opens engine sessions. The agent connects to its local engine; the
/// manager connects to instances for schema maintenance.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, target: &SessionTarget) -> EngineResult<Box<dyn EngineSession>>;
}

/// The production factory.
#[derive(Debug, Clone, Default)]
pub struct MysqlSessionFactory;

#[async_trait]
impl SessionFactory for MysqlSessionFactory {
    async fn connect(&self, target: &SessionTarget) -> EngineResult<Box<dyn EngineSession>> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(target.host.clone())
            .tcp_port(target.port)
            .user(Some(target.user.clone()))
            .pass(Some(target.passwd.clone()));
        if let Some(socket) = &target.socket {
            builder = builder.socket(Some(socket.clone()));
        }
        let conn = Conn::new(builder).await?;
        Ok(Box::new(MysqlSession { conn }))
    }
}

/// A live MySQL session.
pub struct MysqlSession {
    conn: Conn,
}

fn column<T: FromValue>(row: &Row, name: &str) -> EngineResult<T> {
    row.get_opt(name)
        .ok_or_else(|| EngineError::MalformedStatus(format!("missing column {name}")))?
        .map_err(|e| EngineError::MalformedStatus(format!("column {name}: {e}")))
}

fn channel_from_row(row: &Row) -> EngineResult<ReplicaChannel> {
    // Servers without multi-source replication report no Channel_Name.
    let channel = match row.get_opt::<String, _>("Channel_Name") {
        Some(Ok(name)) => name,
        _ => String::new(),
    };
    let io_running: String = column(row, "Slave_IO_Running")?;
    let sql_running: String = column(row, "Slave_SQL_Running")?;
    Ok(ReplicaChannel {
        channel,
        master_host: column(row, "Master_Host")?,
        master_port: column(row, "Master_Port")?,
        io_running: io_running == "Yes",
        sql_running: sql_running == "Yes",
        master_log_file: column(row, "Master_Log_File")?,
        read_master_log_pos: column(row, "Read_Master_Log_Pos")?,
    })
}

#[async_trait]
impl EngineSession for MysqlSession {
    async fn replica_channels(&mut self) -> EngineResult<Vec<ReplicaChannel>> {
        let rows: Vec<Row> = self.conn.query("SHOW SLAVE STATUS").await?;
        rows.iter().map(channel_from_row).collect()
    }

    async fn change_master(
        &mut self,
        channel: &str,
        host: &str,
        port: u16,
        auth: &ReplAuth,
        coords: Option<&BinlogCoords>,
    ) -> EngineResult<()> {
        let stmt = change_master_stmt(channel, host, port, auth, coords);
        self.conn.query_drop(stmt).await?;
        Ok(())
    }

    async fn start_slave(&mut self, channel: &str) -> EngineResult<()> {
        self.conn.query_drop(start_slave_stmt(channel)).await?;
        Ok(())
    }

    async fn stop_slave(&mut self, channel: &str) -> EngineResult<()> {
        self.conn.query_drop(stop_slave_stmt(channel)).await?;
        Ok(())
    }

    async fn reset_slave(&mut self, channel: &str, all: bool) -> EngineResult<()> {
        self.conn.query_drop(reset_slave_stmt(channel, all)).await?;
        Ok(())
    }

    async fn schema_names(&mut self) -> EngineResult<Vec<String>> {
        let names: Vec<String> = self.conn.query("SHOW DATABASES").await?;
        Ok(names
            .into_iter()
            .filter(|name| !is_system_schema(name))
            .collect())
    }

    async fn binlog_enabled(&mut self) -> EngineResult<bool> {
        let value: Option<u8> = self.conn.query_first("SELECT @@log_bin").await?;
        Ok(value == Some(1))
    }

    async fn master_coords(&mut self) -> EngineResult<BinlogCoords> {
        let row: Option<Row> = self.conn.query_first("SHOW MASTER STATUS").await?;
        let row = row.ok_or_else(|| {
            EngineError::MalformedStatus("SHOW MASTER STATUS returned no rows".to_string())
        })?;
        Ok(BinlogCoords {
            file: column(&row, "File")?,
            position: column(&row, "Position")?,
        })
    }

    async fn reset_master(&mut self) -> EngineResult<()> {
        self.conn.query_drop("RESET MASTER").await?;
        Ok(())
    }

    async fn create_user(&mut self, user: &str, source: &str, passwd: &str) -> EngineResult<()> {
        self.conn
            .query_drop(create_user_stmt(user, source, passwd))
            .await?;
        Ok(())
    }

    async fn grant_replication(&mut self, user: &str, source: &str) -> EngineResult<()> {
        self.conn
            .query_drop(grant_replication_stmt(user, source))
            .await?;
        Ok(())
    }

    async fn grant_schema(
        &mut self,
        privileges: &str,
        schema: &str,
        user: &str,
        source: &str,
    ) -> EngineResult<()> {
        self.conn
            .query_drop(grant_schema_stmt(privileges, schema, user, source))
            .await?;
        Ok(())
    }

    async fn drop_user(&mut self, user: &str, source: &str) -> EngineResult<()> {
        self.conn.query_drop(drop_user_stmt(user, source)).await?;
        Ok(())
    }

    async fn create_schema(
        &mut self,
        name: &str,
        character_set: Option<&str>,
        collation: Option<&str>,
    ) -> EngineResult<()> {
        self.conn
            .query_drop(create_schema_stmt(name, character_set, collation))
            .await?;
        Ok(())
    }

    async fn drop_schema(&mut self, name: &str) -> EngineResult<()> {
        self.conn.query_drop(drop_schema_stmt(name)).await?;
        Ok(())
    }
}
