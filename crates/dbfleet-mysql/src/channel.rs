//! Replication channel naming, binlog coordinates, and statement builders.
//!
//! A slave replicates from each of its masters over a named channel. The
//! channel name is a pure function of the master's database id, which is
//! what makes re-bonding idempotent: the same master always lands on the
//! same channel, no matter which control plane issued the bond.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix of every channel the control plane manages.
pub const CHANNEL_PREFIX: &str = "masterdb-";

/// Channel name for a master database id, e.g. `masterdb-42`.
pub fn channel_name(master_id: u64) -> String {
    format!("{CHANNEL_PREFIX}{master_id}")
}

/// Recover the master database id from a channel name. Returns `None` for
/// channels the control plane does not own (including the default unnamed
/// channel).
pub fn master_id_from_channel(name: &str) -> Option<u64> {
    name.strip_prefix(CHANNEL_PREFIX)?.parse().ok()
}

/// A binlog position on a master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogCoords {
    pub file: String,
    pub position: u64,
}

impl fmt::Display for BinlogCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.position)
    }
}

/// A replication credential: user, password, and the grant source host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplAuth {
    pub user: String,
    pub passwd: String,
    pub source: String,
}

/// Replication user name for a slave database id. The credential is scoped
/// to one slave so revoking it never disturbs other links.
pub fn replication_user(slave_id: u64) -> String {
    format!("repluser-{slave_id}")
}

/// One row of `SHOW SLAVE STATUS`, reduced to what the bonding protocol
/// inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaChannel {
    /// Channel name; empty string for the default channel.
    pub channel: String,
    pub master_host: String,
    pub master_port: u16,
    pub io_running: bool,
    pub sql_running: bool,
    pub master_log_file: String,
    pub read_master_log_pos: u64,
}

impl ReplicaChannel {
    /// Whether this channel replicates from the given endpoint.
    pub fn points_at(&self, host: &str, port: u16) -> bool {
        self.master_host == host && self.master_port == port
    }

    /// Both replication threads are up.
    pub fn threads_running(&self) -> bool {
        self.io_running && self.sql_running
    }
}

// ── Statement builders ─────────────────────────────────────────────

/// Quote a MySQL identifier (backtick style).
pub fn quote_identifier(identifier: &str) -> String {
    let mut escaped = identifier.replace('`', "``");
    escaped.insert(0, '`');
    escaped.push('`');
    escaped
}

/// Quote a string literal for inclusion in a statement.
fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Quote a `'user'@'host'` account reference.
fn account(user: &str, source: &str) -> String {
    format!("{}@{}", quote_str(user), quote_str(source))
}

pub fn change_master_stmt(
    channel: &str,
    host: &str,
    port: u16,
    auth: &ReplAuth,
    coords: Option<&BinlogCoords>,
) -> String {
    let mut stmt = format!(
        "CHANGE MASTER TO MASTER_HOST={}, MASTER_PORT={}, MASTER_USER={}, MASTER_PASSWORD={}",
        quote_str(host),
        port,
        quote_str(&auth.user),
        quote_str(&auth.passwd),
    );
    if let Some(coords) = coords {
        stmt.push_str(&format!(
            ", MASTER_LOG_FILE={}, MASTER_LOG_POS={}",
            quote_str(&coords.file),
            coords.position
        ));
    }
    stmt.push_str(&format!(" FOR CHANNEL {}", quote_str(channel)));
    stmt
}

pub fn start_slave_stmt(channel: &str) -> String {
    format!("START SLAVE FOR CHANNEL {}", quote_str(channel))
}

pub fn stop_slave_stmt(channel: &str) -> String {
    format!("STOP SLAVE FOR CHANNEL {}", quote_str(channel))
}

/// `RESET SLAVE` clears relay logs; with `all` it also forgets the master
/// coordinates and drops the channel.
pub fn reset_slave_stmt(channel: &str, all: bool) -> String {
    if all {
        format!("RESET SLAVE ALL FOR CHANNEL {}", quote_str(channel))
    } else {
        format!("RESET SLAVE FOR CHANNEL {}", quote_str(channel))
    }
}

pub fn create_user_stmt(user: &str, source: &str, passwd: &str) -> String {
    format!(
        "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}",
        account(user, source),
        quote_str(passwd)
    )
}

pub fn grant_replication_stmt(user: &str, source: &str) -> String {
    format!(
        "GRANT REPLICATION SLAVE ON *.* TO {}",
        account(user, source)
    )
}

pub fn grant_schema_stmt(privileges: &str, schema: &str, user: &str, source: &str) -> String {
    format!(
        "GRANT {} ON {}.* TO {}",
        privileges,
        quote_identifier(schema),
        account(user, source)
    )
}

pub fn drop_user_stmt(user: &str, source: &str) -> String {
    format!("DROP USER IF EXISTS {}", account(user, source))
}

pub fn create_schema_stmt(name: &str, character_set: Option<&str>, collation: Option<&str>) -> String {
    let mut stmt = format!("CREATE DATABASE {}", quote_identifier(name));
    if let Some(cs) = character_set {
        stmt.push_str(&format!(" CHARACTER SET {cs}"));
    }
    if let Some(collation) = collation {
        stmt.push_str(&format!(" COLLATE {collation}"));
    }
    stmt
}

pub fn drop_schema_stmt(name: &str) -> String {
    format!("DROP DATABASE {}", quote_identifier(name))
}
