use super::TaskManager;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    Start,
    Stop,
    Pause,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequest {
    pub operation: BulkOperation,
    pub task_ids: Vec<i32>,
}

/// Result of the operation for one task id
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub task_id: i32,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub operation: BulkOperation,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkOutcome>,
}

impl TaskManager {
    /// Applies `operation` to every id in order. A failing id is recorded in
    /// the report and does not stop the remaining ones.
    pub async fn bulk_operations(&self, operation: BulkOperation, task_ids: &[i32]) -> BulkReport {
        let mut results = Vec::with_capacity(task_ids.len());
        for &task_id in task_ids {
            let outcome = match operation {
                BulkOperation::Start => self.start_task(task_id).await.map(|worker| {
                    format!("started with pid {}", worker.pid)
                }),
                BulkOperation::Stop => self.stop_task(task_id).await.map(|_| "stopped".to_string()),
                BulkOperation::Pause => self.pause_task(task_id).await.map(|_| "paused".to_string()),
                BulkOperation::Delete => {
                    self.delete_task(task_id).await.map(|_| "deleted".to_string())
                }
            };

            results.push(match outcome {
                Ok(message) => BulkOutcome {
                    task_id,
                    success: true,
                    message,
                },
                Err(e) => {
                    warn!(task_id, "Bulk {:?} failed: {}", operation, e);
                    BulkOutcome {
                        task_id,
                        success: false,
                        message: e.to_string(),
                    }
                }
            });
        }

        let succeeded = results.iter().filter(|outcome| outcome.success).count();
        info!(
            "Bulk {:?}: {} succeeded, {} failed",
            operation,
            succeeded,
            results.len() - succeeded
        );
        BulkReport {
            operation,
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}
