use crate::api::errors::{api_error, ApiError, ApiResponse};
use crate::core::supervisor::WorkerSnapshot;
use crate::core::{
    BulkReport, BulkRequest, ExportFormat, NewTask, SystemHealth, Task, TaskFilters, TaskManager,
    TaskPage, TaskProgress, TaskResult, TaskUpdate,
};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task id taken from the `:id` path segment
pub struct TaskId(pub i32);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TaskId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<i32>::from_request_parts(parts, state)
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.body_text()))?;
        Ok(TaskId(id))
    }
}

#[derive(Serialize)]
pub struct CreatedTask {
    pub id: i32,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// Decodes a JSON body so that malformed input still gets the error envelope
fn decode<T: DeserializeOwned>(body: Result<Json<Value>, JsonRejection>) -> Result<T, ApiError> {
    let Json(value) = body.map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.body_text()))?;
    serde_json::from_value(value).map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.to_string()))
}

/// Creates a new pending task
#[axum::debug_handler]
pub async fn create_task(
    Extension(manager): Extension<TaskManager>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, ApiResponse<CreatedTask>), ApiError> {
    let new_task: NewTask = decode(body)?;
    let id = manager.create_task(&new_task).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok("Task created", CreatedTask { id }),
    ))
}

#[axum::debug_handler]
pub async fn list_tasks(
    Extension(manager): Extension<TaskManager>,
    filters: Result<Query<TaskFilters>, QueryRejection>,
) -> Result<ApiResponse<TaskPage>, ApiError> {
    let Query(filters) = filters.map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.body_text()))?;
    let page = manager.list_tasks(&filters).await?;
    Ok(ApiResponse::ok(format!("{} task(s)", page.total), page))
}

#[axum::debug_handler]
pub async fn get_task(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<Task>, ApiError> {
    let task = manager.get_task(id).await?;
    Ok(ApiResponse::ok("Task found", task))
}

#[axum::debug_handler]
pub async fn update_task(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<ApiResponse<Task>, ApiError> {
    let update: TaskUpdate = decode(body)?;
    let task = manager.update_task(id, &update).await?;
    Ok(ApiResponse::ok("Task updated", task))
}

#[axum::debug_handler]
pub async fn delete_task(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<()>, ApiError> {
    manager.delete_task(id).await?;
    Ok(ApiResponse::done("Task deleted"))
}

#[axum::debug_handler]
pub async fn start_task(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<WorkerSnapshot>, ApiError> {
    let worker = manager.start_task(id).await?;
    Ok(ApiResponse::ok("Task started", worker))
}

#[axum::debug_handler]
pub async fn stop_task(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<()>, ApiError> {
    manager.stop_task(id).await?;
    Ok(ApiResponse::done("Task stopped"))
}

#[axum::debug_handler]
pub async fn pause_task(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<()>, ApiError> {
    manager.pause_task(id).await?;
    Ok(ApiResponse::done("Task paused"))
}

#[axum::debug_handler]
pub async fn resume_task(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<WorkerSnapshot>, ApiError> {
    let worker = manager.resume_task(id).await?;
    Ok(ApiResponse::ok("Task resumed", worker))
}

#[axum::debug_handler]
pub async fn retry_task(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<Task>, ApiError> {
    let task = manager.retry_task(id).await?;
    Ok(ApiResponse::ok("Task reset to pending", task))
}

#[axum::debug_handler]
pub async fn get_task_progress(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<TaskProgress>, ApiError> {
    let progress = manager.get_task_progress(id).await?;
    Ok(ApiResponse::ok("Task progress", progress))
}

#[axum::debug_handler]
pub async fn get_task_results(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<Vec<TaskResult>>, ApiError> {
    let results = manager.get_task_results(id).await?;
    Ok(ApiResponse::ok(format!("{} result(s)", results.len()), results))
}

/// Returns the results as a downloadable JSON or CSV file
#[axum::debug_handler]
pub async fn export_results(
    TaskId(id): TaskId,
    Extension(manager): Extension<TaskManager>,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.body_text()))?;
    let format = match query.format.as_deref() {
        Some(format) => format.parse::<ExportFormat>()?,
        None => ExportFormat::default(),
    };
    let export = manager.export_results(id, format).await?;
    Ok((
        [
            (header::CONTENT_TYPE, export.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export.filename),
            ),
        ],
        export.body,
    )
        .into_response())
}

#[axum::debug_handler]
pub async fn bulk_operations(
    Extension(manager): Extension<TaskManager>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<ApiResponse<BulkReport>, ApiError> {
    let request: BulkRequest = decode(body)?;
    if request.task_ids.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "'task_ids' must not be empty"));
    }
    let report = manager
        .bulk_operations(request.operation, &request.task_ids)
        .await;
    Ok(ApiResponse::ok(
        format!("{} succeeded, {} failed", report.succeeded, report.failed),
        report,
    ))
}

#[axum::debug_handler]
pub async fn health(
    Extension(manager): Extension<TaskManager>,
) -> Result<ApiResponse<SystemHealth>, ApiError> {
    let health = manager.health().await?;
    Ok(ApiResponse::ok("ok", health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{manager_with_script, new_task};
    use crate::core::TaskStatus;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_fetch_through_handlers() {
        let (_dir, manager) = manager_with_script("read line");
        let (status, response) = create_task(
            Extension(manager.clone()),
            Ok(Json(json!({
                "name": "Lisbon designers",
                "platform": "dry-run",
                "keywords": ["designer"],
                "location": "Lisbon"
            }))),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let id = response.data.unwrap().id;

        let fetched = get_task(TaskId(id), Extension(manager)).await.unwrap();
        let task = fetched.data.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_pages, 1);
    }

    #[tokio::test]
    async fn invalid_input_and_transitions_use_error_envelope() {
        let (_dir, manager) = manager_with_script("read line");
        let unknown_field = create_task(
            Extension(manager.clone()),
            Ok(Json(json!({"name": "x", "colour": "red"}))),
        )
        .await;
        assert_eq!(unknown_field.err().unwrap().code, 400);

        let id = manager.create_task(&new_task("idle")).await.unwrap();
        let resumed = resume_task(TaskId(id), Extension(manager.clone())).await;
        assert_eq!(resumed.err().unwrap().code, 409);

        let missing = get_task(TaskId(999), Extension(manager)).await;
        assert_eq!(missing.err().unwrap().code, 404);
    }

    #[tokio::test]
    async fn health_reports_worker_counters_at_top_level() {
        let (_dir, manager) = manager_with_script("read line; exec sleep 5");
        let id = manager.create_task(&new_task("busy")).await.unwrap();
        manager.start_task(id).await.unwrap();

        let response = health(Extension(manager.clone())).await.unwrap();
        let body = serde_json::to_value(&response).unwrap();
        let data = &body["data"];
        assert_eq!(body["status"], json!(true));
        assert_eq!(data["total"], json!(1));
        assert_eq!(data["running"], json!(1));
        assert_eq!(data["completed"], json!(0));
        assert_eq!(data["failed"], json!(0));
        assert_eq!(data["processIsolation"], json!(true));
        assert!(data.get("workers").is_none());
        assert_eq!(data["activeWorkers"][0]["taskId"], json!(id));
        assert_eq!(data["tasks"]["in_progress"], json!(1));

        manager.stop_task(id).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_export_format_uses_error_envelope() {
        let (_dir, manager) = manager_with_script("read line");
        let id = manager.create_task(&new_task("idle")).await.unwrap();
        let response = export_results(
            TaskId(id),
            Extension(manager),
            Ok(Query(ExportQuery {
                format: Some("xml".to_string()),
            })),
        )
        .await;
        assert_eq!(response.err().unwrap().code, 400);
    }

    #[tokio::test]
    async fn malformed_export_query_uses_error_envelope() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let (_dir, manager) = manager_with_script("read line");
        let id = manager.create_task(&new_task("idle")).await.unwrap();
        let app = crate::api::routes::app(manager);
        let response = app
            .oneshot(
                Request::get(format!("/tasks/{}/export?format=csv&format=json", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], json!(false));
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn empty_bulk_request_is_rejected() {
        let (_dir, manager) = manager_with_script("read line");
        let response = bulk_operations(
            Extension(manager),
            Ok(Json(json!({"operation": "start", "task_ids": []}))),
        )
        .await;
        assert_eq!(response.err().unwrap().code, 400);
    }
}
