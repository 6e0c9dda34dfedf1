use super::monitor::WorkerControl;
use crate::core::ProgressSnapshot;
use crate::errors::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc::UnboundedSender, watch};

/// Sub-status of a live worker as observed by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Completed,
    Failed,
    /// A termination signal was sent; the entry is waiting out the grace period
    Stopped,
}

/// The supervisor's in-memory record of one worker process
#[derive(Debug)]
pub struct WorkerHandle {
    pub task_id: i32,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub status: WorkerStatus,
    pub progress: Option<ProgressSnapshot>,
    pub(super) control: UnboundedSender<WorkerControl>,
    pub(super) exited: watch::Receiver<bool>,
}

impl WorkerHandle {
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            task_id: self.task_id,
            pid: self.pid,
            started_at: self.started_at,
            status: self.status,
            progress: self.progress.clone(),
        }
    }
}

/// Read-only copy of a [`WorkerHandle`] handed out of the supervisor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub task_id: i32,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub status: WorkerStatus,
    pub progress: Option<ProgressSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
    /// True iff every tracked worker has its own OS process id
    pub process_isolation: bool,
}

/// Live workers keyed by task id. At most one handle exists per task.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    handles: HashMap<i32, WorkerHandle>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_vacant(&self, task_id: i32) -> Result<(), Error> {
        if self.handles.contains_key(&task_id) {
            return Err(Error::DuplicateProcess(task_id));
        }
        Ok(())
    }

    pub fn insert(&mut self, handle: WorkerHandle) -> Result<(), Error> {
        self.ensure_vacant(handle.task_id)?;
        self.handles.insert(handle.task_id, handle);
        Ok(())
    }

    pub fn contains(&self, task_id: i32) -> bool {
        self.handles.contains_key(&task_id)
    }

    pub fn get(&self, task_id: i32) -> Option<&WorkerHandle> {
        self.handles.get(&task_id)
    }

    /// Returns the handle only if it belongs to the worker with `pid`
    pub fn get_current_mut(&mut self, task_id: i32, pid: u32) -> Option<&mut WorkerHandle> {
        self.handles
            .get_mut(&task_id)
            .filter(|handle| handle.pid == pid)
    }

    pub fn get_mut(&mut self, task_id: i32) -> Option<&mut WorkerHandle> {
        self.handles.get_mut(&task_id)
    }

    /// Removes the handle of `task_id` if it still belongs to `pid`
    pub fn remove_current(&mut self, task_id: i32, pid: u32) -> Option<WorkerHandle> {
        if self.handles.get(&task_id)?.pid != pid {
            return None;
        }
        self.handles.remove(&task_id)
    }

    pub fn task_ids_with_status(&self, status: WorkerStatus) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .handles
            .values()
            .filter(|handle| handle.status == status)
            .map(|handle| handle.task_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let mut snapshots: Vec<WorkerSnapshot> =
            self.handles.values().map(WorkerHandle::snapshot).collect();
        snapshots.sort_by_key(|snapshot| snapshot.task_id);
        snapshots
    }

    pub fn health(&self) -> HealthReport {
        let count = |status: WorkerStatus| {
            self.handles
                .values()
                .filter(|handle| handle.status == status)
                .count()
        };
        let distinct_pids: HashSet<u32> = self.handles.values().map(|handle| handle.pid).collect();

        HealthReport {
            total: self.handles.len(),
            running: count(WorkerStatus::Running),
            completed: count(WorkerStatus::Completed),
            failed: count(WorkerStatus::Failed),
            stopped: count(WorkerStatus::Stopped),
            process_isolation: distinct_pids.len() == self.handles.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn handle(task_id: i32, pid: u32) -> WorkerHandle {
        let (control, _control_rx) = unbounded_channel();
        let (_exited_tx, exited) = watch::channel(false);
        WorkerHandle {
            task_id,
            pid,
            started_at: Utc::now(),
            status: WorkerStatus::Running,
            progress: None,
            control,
            exited,
        }
    }

    #[test]
    fn second_handle_for_same_task_is_refused() {
        let mut registry = WorkerRegistry::new();
        registry.insert(handle(1, 100)).unwrap();
        assert!(matches!(
            registry.insert(handle(1, 101)),
            Err(Error::DuplicateProcess(1))
        ));
        assert_eq!(registry.get(1).unwrap().pid, 100);
    }

    #[test]
    fn removal_is_scoped_to_the_owning_pid() {
        let mut registry = WorkerRegistry::new();
        registry.insert(handle(1, 100)).unwrap();
        assert!(registry.remove_current(1, 99).is_none());
        assert!(registry.contains(1));
        assert!(registry.remove_current(1, 100).is_some());
        assert!(registry.remove_current(1, 100).is_none());
    }

    #[test]
    fn health_counts_statuses_and_checks_isolation() {
        let mut registry = WorkerRegistry::new();
        registry.insert(handle(1, 100)).unwrap();
        registry.insert(handle(2, 200)).unwrap();
        registry.get_mut(2).unwrap().status = WorkerStatus::Stopped;

        let report = registry.health();
        assert_eq!(report.total, 2);
        assert_eq!(report.running, 1);
        assert_eq!(report.stopped, 1);
        assert!(report.process_isolation);

        registry.insert(handle(3, 100)).unwrap();
        assert!(!registry.health().process_isolation);
    }
}
