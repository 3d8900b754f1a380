//! Engine process control.
//!
//! The agent does not supervise engine processes itself; the operator
//! supplies start/stop commands (systemd units, wrapper scripts) and the
//! agent runs them, answering liveness from a TCP probe against the
//! entity's port. Installing an engine is out of scope.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use crate::error::{AgentError, AgentResult};
use crate::store::EntityRecord;

/// Start/stop/probe one hosted engine.
#[async_trait]
pub trait EngineControl: Send + Sync {
    async fn start(&self, record: &EntityRecord) -> AgentResult<()>;

    async fn stop(&self, record: &EntityRecord) -> AgentResult<()>;

    /// Whether the engine answers on its port.
    async fn status(&self, record: &EntityRecord) -> AgentResult<bool>;
}

/// [`EngineControl`] over operator-supplied shell-less commands.
///
/// Command templates may reference `{entity}`, `{port}`, and `{socket}`;
/// the rendered string is split on whitespace and executed directly, so
/// arguments themselves cannot contain spaces.
pub struct CommandControl {
    start_cmd: String,
    stop_cmd: String,
    probe_timeout: Duration,
}

impl CommandControl {
    pub fn new(start_cmd: impl Into<String>, stop_cmd: impl Into<String>) -> Self {
        Self {
            start_cmd: start_cmd.into(),
            stop_cmd: stop_cmd.into(),
            probe_timeout: Duration::from_secs(2),
        }
    }

    fn render(template: &str, record: &EntityRecord) -> String {
        template
            .replace("{entity}", &record.entity)
            .replace("{port}", &record.port.to_string())
            .replace("{socket}", record.socket.as_deref().unwrap_or(""))
    }

    async fn run(&self, template: &str, record: &EntityRecord) -> AgentResult<()> {
        let rendered = Self::render(template, record);
        let mut parts = rendered.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(AgentError::Control("control command not configured".to_string()));
        };

        debug!(entity = %record.entity, command = %rendered, "running control command");
        let status = Command::new(program)
            .args(parts)
            .status()
            .await
            .map_err(|e| AgentError::Control(format!("spawn {program}: {e}")))?;

        if !status.success() {
            return Err(AgentError::Control(format!(
                "{program} exited with {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineControl for CommandControl {
    async fn start(&self, record: &EntityRecord) -> AgentResult<()> {
        self.run(&self.start_cmd, record).await
    }

    async fn stop(&self, record: &EntityRecord) -> AgentResult<()> {
        self.run(&self.stop_cmd, record).await
    }

    async fn status(&self, record: &EntityRecord) -> AgentResult<bool> {
        Ok(port_answers(record.port, self.probe_timeout).await)
    }
}

/// TCP probe: does anything accept on the entity's port?
pub async fn port_answers(port: u16, timeout: Duration) -> bool {
    let addr = format!("127.0.0.1:{port}");
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(&addr)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(port: u16) -> EntityRecord {
        EntityRecord::new("db-1", port, Some("/tmp/db-1.sock".to_string()), "root", "pw")
    }

    #[test]
    fn render_substitutes_placeholders() {
        let rendered =
            CommandControl::render("dbctl start {entity} --port {port} --socket {socket}", &record(3307));
        assert_eq!(rendered, "dbctl start db-1 --port 3307 --socket /tmp/db-1.sock");
    }

    #[tokio::test]
    async fn successful_command_is_ok() {
        let control = CommandControl::new("true", "true");
        assert!(control.start(&record(3307)).await.is_ok());
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let control = CommandControl::new("false", "false");
        let err = control.start(&record(3307)).await.unwrap_err();
        assert!(matches!(err, AgentError::Control(_)));
    }

    #[tokio::test]
    async fn empty_command_is_an_error() {
        let control = CommandControl::new("", "");
        let err = control.stop(&record(3307)).await.unwrap_err();
        assert!(matches!(err, AgentError::Control(_)));
    }

    #[tokio::test]
    async fn status_probes_the_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let control = CommandControl::new("true", "true");
        assert!(control.status(&record(port)).await.unwrap());

        drop(listener);
        assert!(!control.status(&record(port)).await.unwrap());
    }
}
