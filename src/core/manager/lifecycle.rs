use super::TaskManager;
use crate::core::supervisor::{WorkerFailure, WorkerSnapshot, WorkerStatus};
use crate::core::{Task, TaskAction, TaskStatus};
use crate::errors::Error;
use tracing::{debug, info};

impl TaskManager {
    /// Starts a `pending` or `paused` task in a new worker process
    ///
    /// # Errors
    ///
    /// * `Error::TaskAlreadyRunning` / `Error::InvalidTransition` when the
    ///   current status does not allow a start; nothing is spawned or written
    /// * `Error::SpawnFailed` when the process could not be launched; the
    ///   task is marked `failed` before the error is returned
    pub async fn start_task(&self, id: i32) -> Result<WorkerSnapshot, Error> {
        let task = self.get_task(id).await?;
        task.status.ensure_allows(TaskAction::Start, id)?;
        info!(task_id = id, "Starting task");
        self.launch(id).await
    }

    /// Restarts a `paused` task
    pub async fn resume_task(&self, id: i32) -> Result<WorkerSnapshot, Error> {
        let task = self.get_task(id).await?;
        task.status.ensure_allows(TaskAction::Resume, id)?;
        info!(task_id = id, "Resuming task");
        self.launch(id).await
    }

    /// Stops the worker of a running task and leaves the task `paused`
    ///
    /// # Errors
    ///
    /// `Error::InvalidTransition` when the task is not running, including
    /// when its worker finished between the status check and the stop
    pub async fn pause_task(&self, id: i32) -> Result<(), Error> {
        let task = self.get_task(id).await?;
        task.status.ensure_allows(TaskAction::Pause, id)?;

        if !self.supervisor.terminate(id).await? {
            match self.supervisor.worker(id).await.map(|worker| worker.status) {
                // Store says in_progress but nothing is attached in this process
                None => self.with_repo(|repo| {
                    repo.update_status(id, TaskStatus::InProgress, TaskStatus::Paused)
                })?,
                Some(WorkerStatus::Completed) => return Err(finishing(id, TaskStatus::Completed)),
                Some(WorkerStatus::Failed) => return Err(finishing(id, TaskStatus::Failed)),
                // A concurrent request got to the worker first
                Some(WorkerStatus::Stopped | WorkerStatus::Running) => {}
            }
        }
        info!(task_id = id, "Task paused");
        Ok(())
    }

    /// Same transition as [`TaskManager::pause_task`]; a stopped task can be resumed
    pub async fn stop_task(&self, id: i32) -> Result<(), Error> {
        self.pause_task(id).await
    }

    /// Puts a `completed` or `failed` task back to `pending`
    pub async fn retry_task(&self, id: i32) -> Result<Task, Error> {
        let task = self.get_task(id).await?;
        task.status.ensure_allows(TaskAction::Retry, id)?;
        self.with_repo(|repo| repo.reset_for_retry(id))?;
        info!(task_id = id, "Task reset for retry");
        self.get_task(id).await
    }

    /// Deletes a task and its results. Refused while a worker is attached.
    pub async fn delete_task(&self, id: i32) -> Result<(), Error> {
        if self.supervisor.is_tracking(id).await {
            return Err(Error::TaskAlreadyRunning(id));
        }
        self.with_repo(|repo| repo.delete(id))?;
        info!(task_id = id, "Task deleted");
        Ok(())
    }

    async fn launch(&self, id: i32) -> Result<WorkerSnapshot, Error> {
        match self.supervisor.spawn(id).await {
            Ok(snapshot) => Ok(snapshot),
            Err(Error::SpawnFailed { id, reason }) => {
                self.supervisor
                    .record_failure(id, &WorkerFailure::Launch(reason.clone()));
                Err(Error::SpawnFailed { id, reason })
            }
            Err(e) => Err(e),
        }
    }
}

fn finishing(id: i32, outcome: TaskStatus) -> Error {
    debug!(task_id = id, "Worker is already finishing as {}, not pausing", outcome);
    Error::InvalidTransition {
        id,
        from: outcome,
        action: TaskStatus::Paused.entry_verb(),
    }
}
