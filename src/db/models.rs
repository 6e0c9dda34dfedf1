use crate::schema::{task_results, tasks};
use diesel::{AsChangeset, Insertable, Queryable, Selectable};
use serde::{Deserialize, Serialize};

/// Represents a task row in the database
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRecord {
    /// Primary key assigned by SQLite
    pub id: i32,
    pub name: String,
    /// Platform adapter identifier
    pub platform: String,
    /// JSON serialized keyword list
    pub keywords: String,
    pub location: String,
    pub max_pages: i32,
    pub concurrency: i32,
    pub delay_ms: i32,
    pub headless: bool,
    /// Optional JSON serialized proxy configuration
    pub proxy_config: Option<String>,
    pub account_ref: Option<String>,
    /// Storage text of the task status
    pub status: String,
    pub scheduled_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_log: Option<String>,
    pub run_log: Option<String>,
    /// OS process id of the attached worker, only set while in progress
    pub worker_pid: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

/// Values inserted when a task is created
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRecord {
    pub name: String,
    pub platform: String,
    pub keywords: String,
    pub location: String,
    pub max_pages: i32,
    pub concurrency: i32,
    pub delay_ms: i32,
    pub headless: bool,
    pub proxy_config: Option<String>,
    pub account_ref: Option<String>,
    pub status: String,
    pub scheduled_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update of a task row. `None` leaves the column untouched,
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct TaskChangeset {
    pub name: Option<String>,
    pub platform: Option<String>,
    pub keywords: Option<String>,
    pub location: Option<String>,
    pub max_pages: Option<i32>,
    pub concurrency: Option<i32>,
    pub delay_ms: Option<i32>,
    pub headless: Option<bool>,
    pub proxy_config: Option<Option<String>>,
    pub account_ref: Option<Option<String>>,
    pub scheduled_at: Option<Option<String>>,
    pub updated_at: String,
}

/// Represents one scraped result row
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = task_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskResultRecord {
    pub id: i32,
    /// Reference to the owning task
    pub task_id: i32,
    /// JSON serialized payload
    pub payload: String,
    pub created_at: String,
}
