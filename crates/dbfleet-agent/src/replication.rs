//! Replication primitives, executed through an [`EngineSession`].
//!
//! These functions hold the channel-level rules of the bonding protocol:
//! which existing channels block a bond, when force may clear them, when
//! a configured channel auto-starts, and what a readiness probe checks.
//! They know nothing about locks, HTTP, or the catalog; the server wraps
//! them, the control plane decides what their refusals mean.

use tracing::{debug, info};

use dbfleet_mysql::channel_name;
use dbfleet_mysql::session::EngineSession;
use dbfleet_rpc::wire::{
    BondEntity, BondOutcome, GrantOutcome, ReadyProbe, ReplicationReady, RevokeEntity,
    SlaveEntity, UnbondEntity,
};

use crate::error::{AgentError, AgentResult};

/// Configure (and maybe start) the channel replicating the request's
/// master. Conflicting channels refuse the bond unless force clears them.
pub async fn bond(
    session: &mut dyn EngineSession,
    req: &BondEntity,
) -> AgentResult<BondOutcome> {
    let master = &req.master;
    let channel = channel_name(master.database_id);
    let channels = session.replica_channels().await?;

    // Another channel already replicating the same endpoint: live means a
    // hard refusal, stale history needs force to be cleared.
    for other in channels.iter().filter(|c| c.channel != channel) {
        if !other.points_at(&master.host, master.port) {
            continue;
        }
        if other.io_running {
            return Err(AgentError::Refused(format!(
                "channel {} already replicates {}:{}",
                other.channel, master.host, master.port
            )));
        }
        if other.read_master_log_pos > 0 {
            if !req.force {
                return Err(AgentError::Refused(format!(
                    "stale channel {} holds position {} for {}:{}; use force to reset it",
                    other.channel, other.read_master_log_pos, master.host, master.port
                )));
            }
            info!(channel = %other.channel, "force resetting stale channel");
            session.reset_slave(&other.channel, true).await?;
        }
    }

    if let Some(existing) = channels.iter().find(|c| c.channel == channel) {
        let repoint = !existing.points_at(&master.host, master.port);
        if repoint && existing.threads_running() && !req.force {
            return Err(AgentError::Refused(format!(
                "channel {channel} replicates {}:{}; use force to re-point it",
                existing.master_host, existing.master_port
            )));
        }
        session.stop_slave(&channel).await?;
        session.reset_slave(&channel, repoint).await?;
    }

    session
        .change_master(
            &channel,
            &master.host,
            master.port,
            &master.repl_auth("%"),
            master.coords().as_ref(),
        )
        .await?;

    // Start straight away only when there is nothing to pre-load (no
    // schemas) or the caller pinned exact coordinates.
    let start_now = master.schemas.is_empty() || master.coords().is_some();
    if start_now {
        session.start_slave(&channel).await?;
    }
    debug!(%channel, started = start_now, "channel configured");

    Ok(BondOutcome {
        channel,
        started: start_now,
    })
}

/// Tear the channel for the given master down. A live channel backing a
/// ready relation needs force; a channel that is already gone is fine.
pub async fn unbond(session: &mut dyn EngineSession, req: &UnbondEntity) -> AgentResult<()> {
    let channel = channel_name(req.master_id);
    let channels = session.replica_channels().await?;

    match channels.iter().find(|c| c.channel == channel) {
        None => {
            info!(%channel, "channel already absent");
            Ok(())
        }
        Some(existing) => {
            if existing.threads_running() && req.ready && !req.force {
                return Err(AgentError::Refused(format!(
                    "channel {channel} is live; unbond needs force"
                )));
            }
            session.stop_slave(&channel).await?;
            session.reset_slave(&channel, true).await?;
            info!(%channel, "channel removed");
            Ok(())
        }
    }
}

/// Master-side grant: create the replication credential and report where
/// a new slave should start reading.
pub async fn grant(session: &mut dyn EngineSession, req: &SlaveEntity) -> AgentResult<GrantOutcome> {
    let schemas = session.schema_names().await?;
    let binlog_on = session.binlog_enabled().await?;

    if !binlog_on && (req.schemas_required || !schemas.is_empty()) {
        return Err(AgentError::Refused("binlog off on master".to_string()));
    }

    session
        .create_user(&req.auth.user, &req.auth.source, &req.auth.passwd)
        .await?;
    session
        .grant_replication(&req.auth.user, &req.auth.source)
        .await?;
    info!(user = %req.auth.user, source = %req.auth.source, "replication granted");

    let coords = if binlog_on {
        if schemas.is_empty() && !req.schemas_required {
            // Nothing to preserve; hand the slave a clean starting point.
            session.reset_master().await?;
        }
        Some(session.master_coords().await?)
    } else {
        None
    };

    Ok(GrantOutcome {
        file: coords.as_ref().map(|c| c.file.clone()),
        position: coords.as_ref().map(|c| c.position),
        schemas,
    })
}

/// Verify the channel for the given master is alive and caught up enough
/// to serve: endpoint matches, both threads run, every master schema is
/// visible.
pub async fn ready(
    session: &mut dyn EngineSession,
    req: &ReplicationReady,
) -> AgentResult<ReadyProbe> {
    let channel = channel_name(req.master_id);
    let channels = session.replica_channels().await?;

    let Some(status) = channels.iter().find(|c| c.channel == channel) else {
        return Err(AgentError::Refused(format!("channel {channel} not found")));
    };
    if !status.points_at(&req.host, req.port) {
        return Err(AgentError::Refused(format!(
            "channel {channel} replicates {}:{}, expected {}:{}",
            status.master_host, status.master_port, req.host, req.port
        )));
    }
    if !status.threads_running() {
        return Err(AgentError::Refused(
            "replication threads not running".to_string(),
        ));
    }

    let visible = session.schema_names().await?;
    let missing: Vec<String> = req
        .schemas
        .iter()
        .filter(|s| !visible.contains(s))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(AgentError::Refused(format!(
            "schemas not materialized on slave: {}",
            missing.join(", ")
        )));
    }

    Ok(ReadyProbe {
        channel,
        io_running: status.io_running,
        sql_running: status.sql_running,
        missing_schemas: missing,
    })
}

/// Drop a replication credential. The statement is IF EXISTS, so revoke
/// is re-runnable.
pub async fn revoke(session: &mut dyn EngineSession, req: &RevokeEntity) -> AgentResult<()> {
    session.drop_user(&req.user, &req.source).await?;
    info!(user = %req.user, source = %req.source, "replication credential dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSession;
    use dbfleet_mysql::{BinlogCoords, ReplAuth, ReplicaChannel};
    use dbfleet_rpc::wire::MasterSide;

    fn master_side(master_id: u64, schemas: &[&str], coords: Option<(&str, u64)>) -> MasterSide {
        MasterSide {
            database_id: master_id,
            host: "10.0.0.5".to_string(),
            port: 3306,
            repl_user: format!("repluser-{master_id}"),
            repl_passwd: "repl-abcdef".to_string(),
            file: coords.map(|(f, _)| f.to_string()),
            position: coords.map(|(_, p)| p),
            schemas: schemas.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn channel_at(name: &str, host: &str, port: u16, io: bool, sql: bool, pos: u64) -> ReplicaChannel {
        ReplicaChannel {
            channel: name.to_string(),
            master_host: host.to_string(),
            master_port: port,
            io_running: io,
            sql_running: sql,
            master_log_file: "mysql-bin.000001".to_string(),
            read_master_log_pos: pos,
        }
    }

    // ── bond ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fresh_bond_without_schemas_starts_channel() {
        let mut session = ScriptedSession::new();
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: false,
        };

        let outcome = bond(&mut session, &req).await.unwrap();
        assert_eq!(outcome.channel, "masterdb-3");
        assert!(outcome.started);

        let calls = session.calls();
        assert_eq!(calls, vec!["change_master masterdb-3 10.0.0.5:3306", "start_slave masterdb-3"]);
    }

    #[tokio::test]
    async fn bond_with_schemas_and_coords_starts_at_position() {
        let mut session = ScriptedSession::new();
        let req = BondEntity {
            master: master_side(3, &["orders"], Some(("mysql-bin.000002", 154))),
            force: false,
        };

        let outcome = bond(&mut session, &req).await.unwrap();
        assert!(outcome.started);
        assert!(session
            .calls()
            .contains(&"change_master masterdb-3 10.0.0.5:3306 mysql-bin.000002:154".to_string()));
    }

    #[tokio::test]
    async fn bond_with_schemas_without_coords_leaves_channel_stopped() {
        let mut session = ScriptedSession::new();
        let req = BondEntity {
            master: master_side(3, &["orders"], None),
            force: false,
        };

        let outcome = bond(&mut session, &req).await.unwrap();
        assert!(!outcome.started);
        assert!(!session.calls().iter().any(|c| c.starts_with("start_slave")));
    }

    #[tokio::test]
    async fn live_foreign_channel_at_same_endpoint_refuses() {
        let mut session = ScriptedSession::new()
            .with_channel(channel_at("masterdb-9", "10.0.0.5", 3306, true, true, 500));
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: false,
        };

        let err = bond(&mut session, &req).await.unwrap_err();
        assert!(err.to_string().contains("masterdb-9"));
        // Force does not override a live conflict either.
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: true,
        };
        assert!(bond(&mut session, &req).await.is_err());
    }

    #[tokio::test]
    async fn stale_channel_needs_force_to_reset() {
        let stale = channel_at("masterdb-9", "10.0.0.5", 3306, false, false, 500);
        let mut session = ScriptedSession::new().with_channel(stale.clone());
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: false,
        };
        let err = bond(&mut session, &req).await.unwrap_err();
        assert!(err.to_string().contains("force"));

        let mut session = ScriptedSession::new().with_channel(stale);
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: true,
        };
        bond(&mut session, &req).await.unwrap();
        assert!(session.calls().contains(&"reset_slave masterdb-9 all".to_string()));
    }

    #[tokio::test]
    async fn repointing_running_channel_needs_force() {
        let running = channel_at("masterdb-3", "10.0.0.99", 3306, true, true, 200);
        let mut session = ScriptedSession::new().with_channel(running.clone());
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: false,
        };
        let err = bond(&mut session, &req).await.unwrap_err();
        assert!(err.to_string().contains("10.0.0.99"));

        let mut session = ScriptedSession::new().with_channel(running);
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: true,
        };
        bond(&mut session, &req).await.unwrap();
        let calls = session.calls();
        assert!(calls.contains(&"stop_slave masterdb-3".to_string()));
        assert!(calls.contains(&"reset_slave masterdb-3 all".to_string()));
        assert!(calls.contains(&"change_master masterdb-3 10.0.0.5:3306".to_string()));
    }

    #[tokio::test]
    async fn rebond_converges_existing_channel() {
        let stopped = channel_at("masterdb-3", "10.0.0.5", 3306, false, false, 154);
        let mut session = ScriptedSession::new().with_channel(stopped);
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: false,
        };

        let outcome = bond(&mut session, &req).await.unwrap();
        assert!(outcome.started);
        assert_eq!(
            session.calls(),
            vec![
                "stop_slave masterdb-3",
                "reset_slave masterdb-3",
                "change_master masterdb-3 10.0.0.5:3306",
                "start_slave masterdb-3",
            ]
        );
    }

    #[tokio::test]
    async fn bond_engine_error_propagates() {
        let mut session = ScriptedSession::new().failing_on("change_master");
        let req = BondEntity {
            master: master_side(3, &[], None),
            force: false,
        };
        let err = bond(&mut session, &req).await.unwrap_err();
        assert!(matches!(err, AgentError::Engine(_)));
    }

    // ── unbond ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn unbond_absent_channel_is_ok() {
        let mut session = ScriptedSession::new();
        let req = UnbondEntity {
            master_id: 3,
            ready: false,
            schemas: Vec::new(),
            force: false,
        };
        unbond(&mut session, &req).await.unwrap();
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn unbond_live_ready_channel_needs_force() {
        let live = channel_at("masterdb-3", "10.0.0.5", 3306, true, true, 700);
        let mut session = ScriptedSession::new().with_channel(live.clone());
        let req = UnbondEntity {
            master_id: 3,
            ready: true,
            schemas: vec!["orders".to_string()],
            force: false,
        };
        let err = unbond(&mut session, &req).await.unwrap_err();
        assert!(err.to_string().contains("force"));

        let mut session = ScriptedSession::new().with_channel(live);
        let req = UnbondEntity {
            master_id: 3,
            ready: true,
            schemas: vec!["orders".to_string()],
            force: true,
        };
        unbond(&mut session, &req).await.unwrap();
        let calls = session.calls();
        assert!(calls.contains(&"stop_slave masterdb-3".to_string()));
        assert!(calls.contains(&"reset_slave masterdb-3 all".to_string()));
    }

    #[tokio::test]
    async fn unbond_stopped_channel_tears_down() {
        let stopped = channel_at("masterdb-3", "10.0.0.5", 3306, false, true, 700);
        let mut session = ScriptedSession::new().with_channel(stopped);
        let req = UnbondEntity {
            master_id: 3,
            ready: true,
            schemas: Vec::new(),
            force: false,
        };
        unbond(&mut session, &req).await.unwrap();
        assert!(session.calls().contains(&"reset_slave masterdb-3 all".to_string()));
    }

    // ── grant ───────────────────────────────────────────────────────

    fn slave_req(required: bool) -> SlaveEntity {
        SlaveEntity {
            auth: ReplAuth {
                user: "repluser-9".to_string(),
                passwd: "repl-abcdef".to_string(),
                source: "10.0.0.7".to_string(),
            },
            schemas_required: required,
        }
    }

    #[tokio::test]
    async fn grant_refuses_binlog_off_with_schemas() {
        let mut session = ScriptedSession::new()
            .with_schemas(&["orders"])
            .with_binlog(false);
        let err = grant(&mut session, &slave_req(true)).await.unwrap_err();
        assert_eq!(err.to_string(), "binlog off on master");

        // Non-empty engine schemas refuse even when the caller did not
        // expect any.
        let mut session = ScriptedSession::new()
            .with_schemas(&["orders"])
            .with_binlog(false);
        assert!(grant(&mut session, &slave_req(false)).await.is_err());
    }

    #[tokio::test]
    async fn grant_without_binlog_and_schemas_answers_no_coords() {
        let mut session = ScriptedSession::new().with_binlog(false);
        let outcome = grant(&mut session, &slave_req(false)).await.unwrap();
        assert!(outcome.file.is_none());
        assert!(outcome.position.is_none());
        let calls = session.calls();
        assert!(calls.contains(&"create_user repluser-9@10.0.0.7".to_string()));
        assert!(calls.contains(&"grant_replication repluser-9@10.0.0.7".to_string()));
    }

    #[tokio::test]
    async fn grant_on_empty_master_resets_to_clean_coords() {
        let mut session = ScriptedSession::new()
            .with_binlog(true)
            .with_coords(BinlogCoords {
                file: "mysql-bin.000001".to_string(),
                position: 157,
            });
        let outcome = grant(&mut session, &slave_req(false)).await.unwrap();
        assert_eq!(outcome.file.as_deref(), Some("mysql-bin.000001"));
        assert_eq!(outcome.position, Some(157));
        assert!(session.calls().contains(&"reset_master".to_string()));
    }

    #[tokio::test]
    async fn grant_with_schemas_keeps_history() {
        let mut session = ScriptedSession::new()
            .with_binlog(true)
            .with_schemas(&["orders", "billing"])
            .with_coords(BinlogCoords {
                file: "mysql-bin.000007".to_string(),
                position: 93411,
            });
        let outcome = grant(&mut session, &slave_req(true)).await.unwrap();
        assert_eq!(outcome.schemas, vec!["orders", "billing"]);
        assert_eq!(outcome.file.as_deref(), Some("mysql-bin.000007"));
        assert!(!session.calls().contains(&"reset_master".to_string()));
    }

    // ── ready ───────────────────────────────────────────────────────

    fn ready_req(schemas: &[&str]) -> ReplicationReady {
        ReplicationReady {
            master_id: 3,
            host: "10.0.0.5".to_string(),
            port: 3306,
            schemas: schemas.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn ready_refuses_missing_channel() {
        let mut session = ScriptedSession::new();
        let err = ready(&mut session, &ready_req(&[])).await.unwrap_err();
        assert_eq!(err.to_string(), "channel masterdb-3 not found");
    }

    #[tokio::test]
    async fn ready_refuses_endpoint_mismatch() {
        let mut session = ScriptedSession::new()
            .with_channel(channel_at("masterdb-3", "10.0.0.99", 3306, true, true, 500));
        let err = ready(&mut session, &ready_req(&[])).await.unwrap_err();
        assert!(err.to_string().contains("10.0.0.99"));
    }

    #[tokio::test]
    async fn ready_refuses_stopped_threads() {
        let mut session = ScriptedSession::new()
            .with_channel(channel_at("masterdb-3", "10.0.0.5", 3306, true, false, 500));
        let err = ready(&mut session, &ready_req(&[])).await.unwrap_err();
        assert_eq!(err.to_string(), "replication threads not running");
    }

    #[tokio::test]
    async fn ready_refuses_missing_schemas() {
        let mut session = ScriptedSession::new()
            .with_channel(channel_at("masterdb-3", "10.0.0.5", 3306, true, true, 500))
            .with_schemas(&["orders"]);
        let err = ready(&mut session, &ready_req(&["orders", "billing"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("billing"));
        assert!(!err.to_string().contains("orders,"));
    }

    #[tokio::test]
    async fn ready_passes_when_caught_up() {
        let mut session = ScriptedSession::new()
            .with_channel(channel_at("masterdb-3", "10.0.0.5", 3306, true, true, 500))
            .with_schemas(&["orders", "billing"]);
        let probe = ready(&mut session, &ready_req(&["orders"])).await.unwrap();
        assert_eq!(probe.channel, "masterdb-3");
        assert!(probe.io_running && probe.sql_running);
        assert!(probe.missing_schemas.is_empty());
    }

    // ── revoke ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn revoke_drops_the_user() {
        let mut session = ScriptedSession::new();
        let req = RevokeEntity {
            user: "repluser-9".to_string(),
            source: "10.0.0.7".to_string(),
        };
        revoke(&mut session, &req).await.unwrap();
        assert!(session.calls().contains(&"drop_user repluser-9@10.0.0.7".to_string()));
    }
}
