use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents the current status of a task in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Initial state when a task is first created but not yet started
    Pending,
    /// A worker process is attached and executing the task
    InProgress,
    /// The worker was stopped on request; the task can be resumed
    Paused,
    /// The worker reported success
    Completed,
    /// The worker reported an error, crashed, or could not be launched
    Failed,
}

/// Operations requested from outside that are subject to the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Start,
    Resume,
    Pause,
    Retry,
    Update,
}

impl TaskAction {
    fn verb(self) -> &'static str {
        match self {
            TaskAction::Start => "start",
            TaskAction::Resume => "resume",
            TaskAction::Pause => "pause",
            TaskAction::Retry => "retry",
            TaskAction::Update => "update",
        }
    }
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and Failed accept no further automatic transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Verb naming a move into this status, used in transition errors
    pub fn entry_verb(self) -> &'static str {
        match self {
            TaskStatus::Pending => "reset",
            TaskStatus::InProgress => "start",
            TaskStatus::Paused => "pause",
            TaskStatus::Completed => "complete",
            TaskStatus::Failed => "fail",
        }
    }

    /// Checks whether `action` is legal for a task currently in this status.
    ///
    /// Starting or resuming a task that is already running yields
    /// [`Error::TaskAlreadyRunning`]; every other illegal combination yields
    /// [`Error::InvalidTransition`].
    pub fn ensure_allows(self, action: TaskAction, id: i32) -> Result<(), Error> {
        let allowed = match action {
            TaskAction::Start => matches!(self, TaskStatus::Pending | TaskStatus::Paused),
            TaskAction::Resume => self == TaskStatus::Paused,
            TaskAction::Pause => self == TaskStatus::InProgress,
            TaskAction::Retry => self.is_terminal(),
            TaskAction::Update => self != TaskStatus::InProgress,
        };

        if allowed {
            return Ok(());
        }

        match (self, action) {
            (TaskStatus::InProgress, TaskAction::Start | TaskAction::Resume | TaskAction::Update) => {
                Err(Error::TaskAlreadyRunning(id))
            }
            _ => Err(Error::InvalidTransition {
                id,
                from: self,
                action: action.verb(),
            }),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::Validation(format!("unknown task status '{}'", other))),
        }
    }
}
