//! Background worker for persisted control-plane tasks.
//!
//! Create sagas enqueue a ConfirmCreate task instead of blocking until
//! the engine serves. The worker sweeps due tasks on an interval, probes
//! the backend, flips fresh instances to serving, and finishes any
//! create-time bond. Tasks live in the catalog, so a restarted control
//! plane picks up where the dead one stopped; rows still marked Running
//! belonged to a worker that died mid-sweep and are simply re-driven.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use dbfleet_catalog::{epoch_secs, DatabaseId, FleetTask, TaskKind, TaskStatus};

use crate::error::{ManagerError, ManagerResult};
use crate::manager::DatabaseManager;

pub const DEFAULT_POLL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

enum Outcome {
    Done,
    Retry(String),
}

pub struct TaskWorker {
    manager: Arc<DatabaseManager>,
    max_attempts: u32,
    backoff: Duration,
}

impl TaskWorker {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self {
            manager,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_limits(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff = backoff;
        self
    }

    /// Sweep loop; exits when the shutdown channel flips true.
    pub async fn run(&self, poll: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(poll_secs = poll.as_secs(), "task worker running");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "task sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("task worker stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One sweep over everything due. Answers how many tasks were driven.
    pub async fn tick(&self) -> ManagerResult<usize> {
        let due = self.manager.catalog().due_tasks(epoch_secs())?;
        let count = due.len();
        for task in due {
            let task_id = task.task_id;
            if let Err(err) = self.drive(task).await {
                warn!(task_id, error = %err, "task bookkeeping failed");
            }
        }
        Ok(count)
    }

    async fn drive(&self, mut task: FleetTask) -> ManagerResult<()> {
        let catalog = self.manager.catalog();
        task.status = TaskStatus::Running;
        task.attempts += 1;
        task.updated_at = epoch_secs();
        catalog.put_task(&task)?;

        match self.run_task(&task).await {
            Ok(Outcome::Done) => {
                task.status = TaskStatus::Done;
                task.error = None;
                debug!(task_id = task.task_id, "task done");
            }
            Ok(Outcome::Retry(reason)) => {
                if task.attempts >= self.max_attempts {
                    task.status = TaskStatus::Failed;
                    task.error = Some(format!(
                        "gave up after {} attempts: {reason}",
                        task.attempts
                    ));
                    warn!(task_id = task.task_id, %reason, "task failed permanently");
                } else {
                    task.status = TaskStatus::Pending;
                    task.not_before =
                        epoch_secs() + self.backoff.as_secs() * u64::from(task.attempts);
                    task.error = Some(reason);
                }
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err.to_string());
                warn!(task_id = task.task_id, error = %err, "task failed");
            }
        }
        task.updated_at = epoch_secs();
        catalog.put_task(&task)?;
        Ok(())
    }

    /// Ok(Retry) is transient; Err is final.
    async fn run_task(&self, task: &FleetTask) -> ManagerResult<Outcome> {
        match &task.kind {
            TaskKind::ConfirmCreate { database_id, bond } => {
                self.confirm_create(*database_id, *bond).await
            }
        }
    }

    async fn confirm_create(
        &self,
        database_id: DatabaseId,
        bond: Option<DatabaseId>,
    ) -> ManagerResult<Outcome> {
        if self.manager.catalog().get_database(database_id)?.is_none() {
            return Err(ManagerError::NotFound(format!(
                "database {database_id} vanished before confirmation"
            )));
        }
        let health = match self.manager.database_status(database_id).await {
            Ok(health) => health,
            Err(err) => return Ok(Outcome::Retry(format!("status probe failed: {err}"))),
        };
        if !health.running {
            return Ok(Outcome::Retry("engine not serving yet".to_string()));
        }
        self.manager.mark_active(database_id)?;

        if let Some(slave_id) = bond {
            match self
                .manager
                .replication()
                .grant_slave(database_id, slave_id, false)
                .await
            {
                Ok(_) => {}
                // Someone completed the pending relation in the meantime.
                Err(ManagerError::Acceptable(msg)) if msg.contains("already bonded") => {}
                Err(err) => {
                    return Ok(Outcome::Retry(format!("create-time bond failed: {err}")));
                }
            }
        }
        Ok(Outcome::Done)
    }
}
