//! Worker process supervision.
//!
//! Every running task is executed by its own OS process. The supervisor
//! spawns it, keeps one [`WorkerHandle`] per task, turns the worker's
//! protocol envelopes and exit status into task transitions, and stops it
//! cooperatively with a forced kill once the grace period runs out.

mod handlers;
mod monitor;
mod registry;

pub use handlers::WorkerFailure;
pub use registry::{HealthReport, WorkerSnapshot, WorkerStatus};

use crate::config::DATABASE_PATH_ENV;
use crate::core::{ProgressSnapshot, SupervisorMessage, TaskStatus};
use crate::db::Database;
use crate::errors::Error;
use crate::event::SupervisorEvent;
use chrono::Utc;
use monitor::{WorkerControl, WorkerMonitor};
use registry::{WorkerHandle, WorkerRegistry};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Program and arguments used to start a worker process
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub worker: WorkerCommand,
    /// Exported to workers so they open the same store
    pub database_path: String,
    /// How long a stopped worker may take to exit before it is killed
    pub grace_period: Duration,
    /// Number of stderr lines kept as the task's run log
    pub stderr_tail_lines: usize,
}

#[derive(Debug)]
struct Inner {
    database: Database,
    options: SupervisorOptions,
    registry: Mutex<WorkerRegistry>,
    events: UnboundedSender<SupervisorEvent>,
}

/// Cheaply cloneable handle on the process supervisor
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Creates a supervisor and the receiving end of its event channel.
    /// Events are only processed once [`Supervisor::run`] is polled.
    pub fn new(
        database: Database,
        options: SupervisorOptions,
    ) -> (Self, UnboundedReceiver<SupervisorEvent>) {
        let (events, events_rx) = unbounded_channel();
        let supervisor = Self {
            inner: Arc::new(Inner {
                database,
                options,
                registry: Mutex::new(WorkerRegistry::new()),
                events,
            }),
        };
        (supervisor, events_rx)
    }

    /// Creates a supervisor with its event loop already running on the runtime
    pub fn launch(database: Database, options: SupervisorOptions) -> Self {
        let (supervisor, events_rx) = Self::new(database, options);
        tokio::spawn(supervisor.clone().run(events_rx));
        supervisor
    }

    /// Processes worker events one at a time, in arrival order
    pub async fn run(self, mut events_rx: UnboundedReceiver<SupervisorEvent>) {
        while let Some(event) = events_rx.recv().await {
            let task_id = event.task_id();
            debug!(task_id, "Supervisor event: {:?}", event);
            self.handle_event(event).await;
        }
        info!("Supervisor event loop stopped");
    }

    /// Starts a dedicated worker process for `task_id` and sends it `START`.
    ///
    /// The whole operation runs under the registry lock, so two concurrent
    /// calls for the same task cannot both succeed.
    ///
    /// # Errors
    ///
    /// * `Error::DuplicateProcess` if a worker is already tracked for the task
    /// * `Error::SpawnFailed` if the OS refused to start the process
    /// * store errors if the task could not be marked `in_progress`; the
    ///   fresh process is killed in that case
    pub async fn spawn(&self, task_id: i32) -> Result<WorkerSnapshot, Error> {
        let mut registry = self.inner.registry.lock().await;
        registry.ensure_vacant(task_id)?;

        let options = &self.inner.options;
        let mut command = Command::new(&options.worker.program);
        command
            .args(&options.worker.args)
            .env(DATABASE_PATH_ENV, &options.database_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| Error::SpawnFailed {
            id: task_id,
            reason: format!("{}: {}", options.worker.program.display(), e),
        })?;
        let pid = child.id().ok_or_else(|| Error::SpawnFailed {
            id: task_id,
            reason: "process exited before reporting a pid".to_string(),
        })?;
        let (stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    return Err(Error::SpawnFailed {
                        id: task_id,
                        reason: "worker stdio was not captured".to_string(),
                    })
                }
            };

        let (control, control_rx) = unbounded_channel();
        let (exited_tx, exited) = watch::channel(false);
        let handle = WorkerHandle {
            task_id,
            pid,
            started_at: Utc::now(),
            status: WorkerStatus::Running,
            progress: None,
            control: control.clone(),
            exited,
        };
        let snapshot = handle.snapshot();
        registry.insert(handle)?;

        // The lock stays held across this write: a handle is never visible
        // to terminate() or the event loop before its row is in_progress.
        if let Err(e) = self
            .inner
            .database
            .with_repo(|repo| repo.attach_worker(task_id, pid))
        {
            registry.remove_current(task_id, pid);
            error!(task_id, pid, "Failed to mark task as running, killing worker: {}", e);
            return Err(e);
        }

        // Queued before the monitor runs so START is the first thing the worker reads
        if control
            .send(WorkerControl::Send(SupervisorMessage::Start { task_id }))
            .is_err()
        {
            debug!(task_id, pid, "Control channel closed before START was queued");
        }

        let monitor = WorkerMonitor {
            task_id,
            pid,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            control: control_rx,
            events: self.inner.events.clone(),
            exited: exited_tx,
            stderr_capacity: options.stderr_tail_lines,
        };
        tokio::spawn(monitor.run());

        info!(task_id, pid, "Worker spawned");
        Ok(snapshot)
    }

    /// Asks the worker of `task_id` to stop and marks the task `paused`.
    ///
    /// Waits up to the grace period for the process to exit and kills it
    /// otherwise. The handle is removed in both cases. Returns `false` when
    /// no running worker was tracked for the task.
    pub async fn terminate(&self, task_id: i32) -> Result<bool, Error> {
        let (pid, control, mut exited) = {
            let mut registry = self.inner.registry.lock().await;
            match registry.get_mut(task_id) {
                Some(handle) if handle.status == WorkerStatus::Running => {
                    handle.status = WorkerStatus::Stopped;
                    (handle.pid, handle.control.clone(), handle.exited.clone())
                }
                _ => return Ok(false),
            }
        };

        info!(task_id, pid, "Stopping worker");
        if control
            .send(WorkerControl::Send(SupervisorMessage::Stop {}))
            .is_err()
        {
            debug!(task_id, pid, "Worker monitor already gone");
        }

        let stored = self
            .inner
            .database
            .with_repo(|repo| {
                repo.update_status(task_id, TaskStatus::InProgress, TaskStatus::Paused)
            });

        let grace = self.inner.options.grace_period;
        let exited_in_time = tokio::time::timeout(grace, exited.wait_for(|done| *done))
            .await
            .is_ok();
        if !exited_in_time {
            warn!(
                task_id,
                pid,
                "Worker still alive after {}, killing it",
                humantime::format_duration(grace)
            );
            if control.send(WorkerControl::Kill).is_err() {
                debug!(task_id, pid, "Worker monitor already gone, nothing to kill");
            }
        }

        self.inner
            .registry
            .lock()
            .await
            .remove_current(task_id, pid);

        stored.map(|_| true)
    }

    /// Terminates every running worker concurrently. Returns how many were signalled.
    pub async fn terminate_all(&self) -> usize {
        let task_ids = self
            .inner
            .registry
            .lock()
            .await
            .task_ids_with_status(WorkerStatus::Running);
        if task_ids.is_empty() {
            return 0;
        }

        info!("Terminating {} worker(s)", task_ids.len());
        let mut pending = JoinSet::new();
        for task_id in task_ids {
            let supervisor = self.clone();
            pending.spawn(async move { (task_id, supervisor.terminate(task_id).await) });
        }

        let mut terminated = 0;
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((_, Ok(true))) => terminated += 1,
                Ok((_, Ok(false))) => {}
                Ok((task_id, Err(e))) => {
                    terminated += 1;
                    warn!(task_id, "Worker stopped but task status not stored: {}", e)
                }
                Err(e) => error!("Termination task panicked: {}", e),
            }
        }
        terminated
    }

    pub async fn health_check(&self) -> HealthReport {
        self.inner.registry.lock().await.health()
    }

    pub async fn is_tracking(&self, task_id: i32) -> bool {
        self.inner.registry.lock().await.contains(task_id)
    }

    /// Latest progress reported by the live worker of `task_id`
    pub async fn progress(&self, task_id: i32) -> Option<ProgressSnapshot> {
        self.inner
            .registry
            .lock()
            .await
            .get(task_id)
            .and_then(|handle| handle.progress.clone())
    }

    pub async fn worker(&self, task_id: i32) -> Option<WorkerSnapshot> {
        self.inner
            .registry
            .lock()
            .await
            .get(task_id)
            .map(WorkerHandle::snapshot)
    }

    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        self.inner.registry.lock().await.snapshots()
    }
}
