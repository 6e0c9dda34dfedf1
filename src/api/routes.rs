//! API routes configuration module

use crate::api::handlers::{
    bulk_operations, create_task, delete_task, export_results, get_task, get_task_progress,
    get_task_results, health, list_tasks, pause_task, resume_task, retry_task, start_task,
    stop_task, update_task,
};
use crate::core::TaskManager;
use axum::{
    routing::{get, post},
    Extension, Router,
};

/// Creates and configures the API router with all routes
///
/// # Arguments
/// * `manager` - Task manager shared across handlers
///
/// # Returns
/// * `Router` - Configured router with all API endpoints and middleware
pub fn app(manager: TaskManager) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/bulk", post(bulk_operations))
        .route(
            "/tasks/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/tasks/:id/start", post(start_task))
        .route("/tasks/:id/stop", post(stop_task))
        .route("/tasks/:id/pause", post(pause_task))
        .route("/tasks/:id/resume", post(resume_task))
        .route("/tasks/:id/retry", post(retry_task))
        .route("/tasks/:id/progress", get(get_task_progress))
        .route("/tasks/:id/results", get(get_task_results))
        .route("/tasks/:id/export", get(export_results))
        .layer(Extension(manager))
}
