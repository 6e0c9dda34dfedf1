use super::registry::WorkerStatus;
use super::Supervisor;
use crate::core::WorkerMessage;
use crate::errors::Error;
use crate::event::SupervisorEvent;
use std::fmt;
use std::process::ExitStatus;
use tracing::{debug, error, info, warn};

/// Why a task ended up Failed. Every failure path goes through
/// [`Supervisor::record_failure`] so the stored error log has one format.
#[derive(Debug, Clone)]
pub enum WorkerFailure {
    /// The worker sent an `ERROR` envelope
    Reported(String),
    /// The process exited with a nonzero code or was killed by a signal
    Exited(ExitStatus),
    /// Waiting on the process failed
    Process(String),
    /// The process could not be started at all
    Launch(String),
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerFailure::Reported(message) => write!(f, "worker error: {}", message),
            WorkerFailure::Exited(status) => write!(f, "worker crashed: {}", describe_exit(status)),
            WorkerFailure::Process(error) => write!(f, "worker process error: {}", error),
            WorkerFailure::Launch(reason) => write!(f, "worker launch failed: {}", reason),
        }
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }
    status.to_string()
}

impl Supervisor {
    /// Dispatches one event from a worker monitor. Never returns an error:
    /// failures are logged and turned into a Failed transition of the task
    /// the event belongs to.
    pub async fn handle_event(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Message {
                task_id,
                pid,
                message,
            } => self.on_message(task_id, pid, message).await,
            SupervisorEvent::Exited {
                task_id,
                pid,
                status,
                stderr_tail,
            } => self.on_exit(task_id, pid, status, stderr_tail).await,
            SupervisorEvent::ProcessError { task_id, pid, error } => {
                self.on_process_error(task_id, pid, error).await
            }
        }
    }

    async fn on_message(&self, task_id: i32, pid: u32, message: WorkerMessage) {
        match message {
            WorkerMessage::Progress(snapshot) => {
                let mut registry = self.inner.registry.lock().await;
                match registry.get_current_mut(task_id, pid) {
                    Some(handle) if handle.status == WorkerStatus::Running => {
                        debug!(
                            task_id,
                            page = snapshot.current_page,
                            total = snapshot.total_pages,
                            "Progress {:.0}%",
                            snapshot.percentage
                        );
                        handle.progress = Some(snapshot);
                    }
                    _ => debug!(task_id, pid, "Progress from a worker that is no longer running"),
                }
            }
            WorkerMessage::Completed {} => {
                if !self.claim_terminal(task_id, pid, WorkerStatus::Completed).await {
                    debug!(task_id, pid, "Duplicate or late completion ignored");
                    return;
                }
                self.record_completion(task_id);
                self.release(task_id, pid).await;
            }
            WorkerMessage::Error { message } => {
                if !self.claim_terminal(task_id, pid, WorkerStatus::Failed).await {
                    debug!(task_id, pid, "Error from a finished worker ignored: {}", message);
                    return;
                }
                self.record_failure(task_id, &WorkerFailure::Reported(message));
                self.release(task_id, pid).await;
            }
        }
    }

    async fn on_exit(&self, task_id: i32, pid: u32, status: ExitStatus, stderr_tail: Vec<String>) {
        let observed = {
            let registry = self.inner.registry.lock().await;
            match registry.get(task_id) {
                Some(handle) if handle.pid != pid => {
                    debug!(task_id, pid, "Exit of a replaced worker ignored");
                    return;
                }
                Some(handle) => Some(handle.status),
                None => None,
            }
        };

        if !stderr_tail.is_empty() {
            let run_log = stderr_tail.join("\n");
            if let Err(e) = self.inner.database.with_repo(|repo| repo.set_run_log(task_id, &run_log)) {
                warn!(task_id, "Failed to store run log: {}", e);
            }
        }

        match observed {
            Some(WorkerStatus::Running) => {
                let terminal = if status.success() {
                    WorkerStatus::Completed
                } else {
                    WorkerStatus::Failed
                };
                if !self.claim_terminal(task_id, pid, terminal).await {
                    return;
                }
                if status.success() {
                    info!(task_id, pid, "Worker exited cleanly without a completion message");
                    self.record_completion(task_id);
                } else {
                    self.record_failure(task_id, &WorkerFailure::Exited(status));
                }
                self.release(task_id, pid).await;
            }
            Some(_) => {
                debug!(task_id, pid, "Worker exited after being finalized: {}", status);
                self.release(task_id, pid).await;
            }
            None => debug!(task_id, pid, "Exit of an untracked worker: {}", status),
        }
    }

    async fn on_process_error(&self, task_id: i32, pid: u32, error: String) {
        if !self.claim_terminal(task_id, pid, WorkerStatus::Failed).await {
            warn!(task_id, pid, "Process error on a finished worker: {}", error);
            self.release(task_id, pid).await;
            return;
        }
        self.record_failure(task_id, &WorkerFailure::Process(error));
        self.release(task_id, pid).await;
    }

    /// Moves a running handle to its terminal sub-status. Returns false when
    /// the handle is absent, belongs to another process, or was already
    /// finalized or stopped, which makes repeated terminal events no-ops.
    async fn claim_terminal(&self, task_id: i32, pid: u32, status: WorkerStatus) -> bool {
        let mut registry = self.inner.registry.lock().await;
        match registry.get_current_mut(task_id, pid) {
            Some(handle) if handle.status == WorkerStatus::Running => {
                handle.status = status;
                true
            }
            _ => false,
        }
    }

    async fn release(&self, task_id: i32, pid: u32) {
        let mut registry = self.inner.registry.lock().await;
        if registry.remove_current(task_id, pid).is_some() {
            debug!(task_id, pid, "Worker handle released");
        }
    }

    fn record_completion(&self, task_id: i32) {
        match self.inner.database.with_repo(|repo| repo.set_completion(task_id)) {
            Ok(()) => info!(task_id, "Task completed"),
            Err(e @ Error::InvalidTransition { .. }) => warn!(task_id, "Completion not stored: {}", e),
            Err(e) => {
                error!(task_id, "Failed to store completion: {}", e);
                self.record_failure(
                    task_id,
                    &WorkerFailure::Process(format!("could not record completion: {}", e)),
                );
            }
        }
    }

    /// The single Failed transition: status, error log and pid in one write
    pub fn record_failure(&self, task_id: i32, failure: &WorkerFailure) {
        let error_log = failure.to_string();
        warn!(task_id, "Task failed: {}", error_log);
        if let Err(e) = self
            .inner
            .database
            .with_repo(|repo| repo.set_failure(task_id, &error_log))
        {
            error!(task_id, "Failed to store task failure: {}", e);
        }
    }
}
