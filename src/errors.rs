use crate::core::TaskStatus;
use diesel::r2d2::PoolError;
use diesel::result::Error as DieselError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Diesel error: {0}")]
    DieselError(#[from] DieselError),
    #[error("Connection pool error: {0}")]
    PoolError(#[from] PoolError),
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Timestamp error: {0}")]
    TimestampError(#[from] chrono::ParseError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Task {0} not found")]
    NotFound(i32),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Cannot {action} task {id} while it is {from}")]
    InvalidTransition {
        id: i32,
        from: TaskStatus,
        action: &'static str,
    },
    #[error("Task {0} is already running")]
    TaskAlreadyRunning(i32),
    #[error("A worker process is already attached to task {0}")]
    DuplicateProcess(i32),
    #[error("Failed to launch worker for task {id}: {reason}")]
    SpawnFailed { id: i32, reason: String },
    #[error("Unknown sort key '{0}'")]
    InvalidSort(String),
    #[error("Unknown platform '{0}'")]
    UnknownPlatform(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}
