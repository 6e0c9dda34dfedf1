mod bulk;
mod lifecycle;
mod results;

pub use bulk::{BulkOperation, BulkOutcome, BulkReport, BulkRequest};
pub use results::{ExportFormat, ExportedResults};

use crate::core::supervisor::{HealthReport, Supervisor, WorkerSnapshot};
use crate::core::{NewTask, ProgressSnapshot, Task, TaskAction, TaskStatus, TaskUpdate};
use crate::db::{Database, ListQuery, TaskRepository, TaskSort};
use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Upper bound applied to `page_size` in listings
const MAX_PAGE_SIZE: u32 = 100;

/// Public entry point for task operations.
///
/// Coordinates the durable task store with the process supervisor and
/// enforces the lifecycle rules before anything is spawned or written.
#[derive(Debug, Clone)]
pub struct TaskManager {
    /// Durable task store
    pub database: Database,
    supervisor: Supervisor,
}

/// Listing filters as accepted from callers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilters {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub sort: Option<TaskSort>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl From<&TaskFilters> for ListQuery {
    fn from(filters: &TaskFilters) -> Self {
        let defaults = ListQuery::default();
        ListQuery {
            page: filters.page.unwrap_or(defaults.page),
            page_size: filters
                .page_size
                .unwrap_or(defaults.page_size)
                .min(MAX_PAGE_SIZE),
            sort: filters.sort.unwrap_or(defaults.sort),
            status: filters.status,
        }
    }
}

/// A listed task with the live progress of its worker, if any
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    #[serde(flatten)]
    pub task: Task,
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<TaskSummary>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskProgress {
    pub task_id: i32,
    pub status: TaskStatus,
    /// Pid of the attached worker, if any
    pub pid: Option<u32>,
    /// True when the snapshot was reported by a running worker
    pub live: bool,
    pub progress: ProgressSnapshot,
}

/// Worker counters at the top level, plus the live workers and task totals
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    #[serde(flatten)]
    pub workers: HealthReport,
    pub active_workers: Vec<WorkerSnapshot>,
    pub tasks: BTreeMap<&'static str, i64>,
}

impl TaskManager {
    pub fn new(database: Database, supervisor: Supervisor) -> Self {
        Self {
            database,
            supervisor,
        }
    }

    #[cfg(test)]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    fn with_repo<T>(
        &self,
        f: impl FnOnce(&mut TaskRepository<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.database.with_repo(f)
    }

    /// Persists a new `pending` task and returns its id
    pub async fn create_task(&self, new_task: &NewTask) -> Result<i32, Error> {
        let id = self.with_repo(|repo| repo.create(new_task))?;
        info!(task_id = id, platform = %new_task.platform, "Task created: {}", new_task.name);
        Ok(id)
    }

    pub async fn get_task(&self, id: i32) -> Result<Task, Error> {
        self.with_repo(|repo| repo.get_by_id(id))?
            .ok_or(Error::NotFound(id))
    }

    pub async fn list_tasks(&self, filters: &TaskFilters) -> Result<TaskPage, Error> {
        let query = ListQuery::from(filters);
        let (tasks, total) = self.with_repo(|repo| {
            let tasks = repo.list(&query)?;
            let total = match query.status {
                Some(status) => repo.count_by_status(status)?,
                None => repo.count()?,
            };
            Ok((tasks, total))
        })?;

        let mut summaries = Vec::with_capacity(tasks.len());
        for task in tasks {
            let progress = self
                .supervisor
                .progress(task.id)
                .await
                .map(|snapshot| snapshot.percentage);
            summaries.push(TaskSummary { task, progress });
        }

        Ok(TaskPage {
            tasks: summaries,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    /// Changes descriptive or execution fields of a task that has no live worker
    pub async fn update_task(&self, id: i32, update: &TaskUpdate) -> Result<Task, Error> {
        update.validate()?;
        let task = self.get_task(id).await?;
        if self.supervisor.is_tracking(id).await {
            return Err(Error::TaskAlreadyRunning(id));
        }
        task.status.ensure_allows(TaskAction::Update, id)?;

        self.with_repo(|repo| repo.update(id, update))?;
        info!(task_id = id, "Task updated");
        self.get_task(id).await
    }

    /// Live progress when a worker reports it, otherwise a value derived
    /// from the stored status: 100% for completed tasks, 0% for the rest
    pub async fn get_task_progress(&self, id: i32) -> Result<TaskProgress, Error> {
        let task = self.get_task(id).await?;
        let worker = self.supervisor.worker(id).await;
        if let Some(progress) = worker.as_ref().and_then(|w| w.progress.clone()) {
            return Ok(TaskProgress {
                task_id: id,
                status: task.status,
                pid: worker.map(|w| w.pid),
                live: true,
                progress,
            });
        }

        let progress = if task.status == TaskStatus::Completed {
            let results = self.with_repo(|repo| repo.count_results(id))?;
            ProgressSnapshot::finished(task.max_pages, results.max(0) as u64)
        } else {
            ProgressSnapshot {
                total_pages: task.max_pages,
                ..Default::default()
            }
        };

        Ok(TaskProgress {
            task_id: id,
            status: task.status,
            pid: worker.map(|w| w.pid),
            live: false,
            progress,
        })
    }

    pub async fn health(&self) -> Result<SystemHealth, Error> {
        let workers = self.supervisor.health_check().await;
        let active_workers = self.supervisor.workers().await;
        let tasks = self.with_repo(|repo| {
            let mut counts = BTreeMap::new();
            for status in TaskStatus::ALL {
                counts.insert(status.as_str(), repo.count_by_status(status)?);
            }
            Ok(counts)
        })?;
        Ok(SystemHealth {
            workers,
            active_workers,
            tasks,
        })
    }

    /// Moves tasks left `in_progress` by a previous run of the server to
    /// `paused`. Must run before any worker is spawned.
    pub async fn recover_interrupted_tasks(&self) -> Result<usize, Error> {
        let interrupted = self.with_repo(|repo| repo.list_by_status(TaskStatus::InProgress))?;
        let mut recovered = 0;
        for task in interrupted {
            if self.supervisor.is_tracking(task.id).await {
                continue;
            }
            warn!(
                task_id = task.id,
                pid = ?task.worker_pid,
                "Task was left running by a previous process, pausing it"
            );
            self.with_repo(|repo| {
                repo.update_status(task.id, TaskStatus::InProgress, TaskStatus::Paused)
            })?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Stops every live worker. Used when the server shuts down.
    pub async fn shutdown(&self) -> usize {
        let stopped = self.supervisor.terminate_all().await;
        info!("Shutdown complete, {} worker(s) stopped", stopped);
        stopped
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{manager_with_script, new_task};
    use super::*;
    use std::time::Duration;

    const COMPLETES: &str = r#"read line
echo '{"type":"PROGRESS","currentPage":1,"totalPages":2,"resultsCount":5,"percentage":50.0}'
echo '{"type":"COMPLETED"}'"#;
    const HANG: &str = "read line; exec sleep 5";
    const COMPLETES_THEN_WAITS: &str = r#"read line
echo '{"type":"COMPLETED"}'
read stop"#;

    async fn wait_for_status(manager: &TaskManager, id: i32, status: TaskStatus) -> Task {
        for _ in 0..100 {
            let task = manager.get_task(id).await.unwrap();
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("task {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn create_rejects_missing_fields() {
        let (_dir, manager) = manager_with_script(COMPLETES);
        let mut task = new_task("incomplete");
        task.location = String::new();
        assert!(matches!(
            manager.create_task(&task).await,
            Err(Error::Validation(message)) if message.contains("location")
        ));
        assert_eq!(manager.list_tasks(&TaskFilters::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn started_task_runs_to_completion() {
        let (_dir, manager) = manager_with_script(COMPLETES);
        let id = manager.create_task(&new_task("happy")).await.unwrap();

        manager.start_task(id).await.unwrap();
        let task = wait_for_status(&manager, id, TaskStatus::Completed).await;
        assert!(task.completed_at.is_some());

        let progress = manager.get_task_progress(id).await.unwrap();
        assert!(!progress.live);
        assert_eq!(progress.progress.percentage, 100.0);
    }

    #[tokio::test]
    async fn resume_on_completed_task_is_rejected_without_side_effects() {
        let (_dir, manager) = manager_with_script(COMPLETES);
        let id = manager.create_task(&new_task("done")).await.unwrap();
        manager
            .database
            .with_repo(|repo| repo.set_completion(id))
            .unwrap();
        let before = manager.get_task(id).await.unwrap();

        assert!(matches!(
            manager.resume_task(id).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(!manager.supervisor().is_tracking(id).await);
        let after = manager.get_task(id).await.unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn pause_then_resume_spawns_a_new_worker() {
        let (_dir, manager) = manager_with_script(HANG);
        let id = manager.create_task(&new_task("pausable")).await.unwrap();

        let first = manager.start_task(id).await.unwrap();
        assert!(matches!(
            manager.start_task(id).await,
            Err(Error::TaskAlreadyRunning(_))
        ));

        manager.pause_task(id).await.unwrap();
        let paused = manager.get_task(id).await.unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);
        assert!(!manager.supervisor().is_tracking(id).await);

        let second = manager.resume_task(id).await.unwrap();
        assert_ne!(first.pid, second.pid);
        assert_eq!(
            manager.get_task(id).await.unwrap().status,
            TaskStatus::InProgress
        );
        manager.stop_task(id).await.unwrap();
    }

    #[tokio::test]
    async fn pause_racing_completion_never_reopens_a_finished_task() {
        let (_dir, manager) = manager_with_script(COMPLETES_THEN_WAITS);
        for round in 0..40 {
            let id = manager
                .create_task(&new_task(&format!("race-{}", round)))
                .await
                .unwrap();
            manager.start_task(id).await.unwrap();
            let paused = manager.pause_task(id).await;

            for _ in 0..100 {
                if !manager.supervisor().is_tracking(id).await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let task = manager.get_task(id).await.unwrap();
            match paused {
                Ok(()) => {
                    assert_eq!(task.status, TaskStatus::Paused);
                    assert!(task.completed_at.is_none());
                }
                Err(Error::InvalidTransition {
                    from: TaskStatus::Completed,
                    ..
                }) => {
                    assert_eq!(task.status, TaskStatus::Completed);
                    assert!(task.completed_at.is_some());
                }
                Err(e) => panic!("unexpected pause outcome for task {}: {}", id, e),
            }
            assert!(manager.pause_task(id).await.is_err());
        }
    }

    #[tokio::test]
    async fn pause_requires_a_running_task() {
        let (_dir, manager) = manager_with_script(HANG);
        let id = manager.create_task(&new_task("idle")).await.unwrap();
        assert!(matches!(
            manager.pause_task(id).await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn running_task_cannot_be_deleted_or_updated() {
        let (_dir, manager) = manager_with_script(HANG);
        let id = manager.create_task(&new_task("busy")).await.unwrap();
        manager.start_task(id).await.unwrap();

        assert!(matches!(
            manager.delete_task(id).await,
            Err(Error::TaskAlreadyRunning(_))
        ));
        let update = TaskUpdate {
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_task(id, &update).await,
            Err(Error::TaskAlreadyRunning(_))
        ));

        manager.stop_task(id).await.unwrap();
        let updated = manager.update_task(id, &update).await.unwrap();
        assert_eq!(updated.name, "renamed");
        manager.delete_task(id).await.unwrap();
        assert!(matches!(
            manager.get_task(id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn spawn_failure_marks_task_failed() {
        let (_dir, manager) = manager_with_script(HANG);
        let database = manager.database.clone();
        let supervisor = Supervisor::launch(
            database.clone(),
            crate::core::SupervisorOptions {
                worker: crate::core::WorkerCommand {
                    program: "/nonexistent/worker".into(),
                    args: vec![],
                },
                database_path: String::new(),
                grace_period: Duration::from_millis(100),
                stderr_tail_lines: 0,
            },
        );
        let manager = TaskManager::new(database, supervisor);
        let id = manager.create_task(&new_task("broken")).await.unwrap();

        assert!(matches!(
            manager.start_task(id).await,
            Err(Error::SpawnFailed { .. })
        ));
        let task = manager.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_log.unwrap().contains("launch failed"));

        manager.retry_task(id).await.unwrap();
        let task = manager.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.error_log.is_none());
    }

    #[tokio::test]
    async fn interrupted_tasks_are_paused_on_recovery() {
        let (_dir, manager) = manager_with_script(HANG);
        let id = manager.create_task(&new_task("orphan")).await.unwrap();
        manager
            .database
            .with_repo(|repo| repo.attach_worker(id, 4242))
            .unwrap();

        assert_eq!(manager.recover_interrupted_tasks().await.unwrap(), 1);
        let task = manager.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert!(task.worker_pid.is_none());
    }

    #[tokio::test]
    async fn listing_is_paged_and_filtered() {
        let (_dir, manager) = manager_with_script(HANG);
        for i in 0..5 {
            manager
                .create_task(&new_task(&format!("task-{}", i)))
                .await
                .unwrap();
        }
        manager
            .database
            .with_repo(|repo| repo.set_completion(1))
            .unwrap();

        let page = manager
            .list_tasks(&TaskFilters {
                page: Some(2),
                page_size: Some(2),
                sort: Some(TaskSort::NameAsc),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        let names: Vec<&str> = page.tasks.iter().map(|s| s.task.name.as_str()).collect();
        assert_eq!(names, vec!["task-2", "task-3"]);

        let completed = manager
            .list_tasks(&TaskFilters {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.total, 1);

        let health = manager.health().await.unwrap();
        assert_eq!(health.tasks["pending"], 4);
        assert_eq!(health.tasks["completed"], 1);
        assert_eq!(health.workers.total, 0);
    }
}
