//! dbfleet-mysql — MySQL plumbing for the DbFleet control plane.
//!
//! Two layers live here:
//!
//! * [`channel`] — pure, connection-free material: replication channel
//!   naming, binlog coordinates, and the exact SQL statements the bonding
//!   protocol issues. Everything in it is unit-testable as strings.
//! * [`session`] — the [`session::EngineSession`] trait the agent and the
//!   manager drive, plus its `mysql_async` implementation. Tests substitute
//!   fake sessions; production code connects over TCP or the engine's
//!   administrative socket.
//!
//! Statement text targets MySQL 5.7 (`CHANGE MASTER TO`, `START SLAVE FOR
//! CHANNEL`), which the 8.x line still accepts.

pub mod channel;
pub mod error;
pub mod session;

pub use channel::{
    BinlogCoords, ReplAuth, ReplicaChannel, channel_name, master_id_from_channel,
    replication_user,
};
pub use error::{EngineError, EngineResult};
pub use session::{
    EngineSession, MysqlSessionFactory, SYSTEM_SCHEMAS, SessionFactory, SessionTarget,
    is_system_schema,
};

use regex::Regex;

/// Whether a schema name is acceptable: leading letter, then letters,
/// digits, or underscores, two characters minimum. Case-insensitive.
pub fn valid_schema_name(name: &str) -> bool {
    match Regex::new(r"(?i)^[a-z][a-z0-9_]+$") {
        Ok(re) => re.is_match(name),
        Err(_) => false,
    }
}
