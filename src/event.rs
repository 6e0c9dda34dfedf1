use crate::core::WorkerMessage;
use std::process::ExitStatus;

/// Events observed on worker processes and delivered to the supervisor loop.
/// Every event carries the pid of the process it came from so that late
/// events of a replaced worker can be told apart from the current one.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A protocol envelope was read from the worker's stdout
    Message {
        task_id: i32,
        pid: u32,
        message: WorkerMessage,
    },

    /// The worker process exited; `stderr_tail` holds its last log lines
    Exited {
        task_id: i32,
        pid: u32,
        status: ExitStatus,
        stderr_tail: Vec<String>,
    },

    /// Waiting on the worker process failed at the OS level
    ProcessError {
        task_id: i32,
        pid: u32,
        error: String,
    },
}

impl SupervisorEvent {
    pub fn task_id(&self) -> i32 {
        match self {
            SupervisorEvent::Message { task_id, .. }
            | SupervisorEvent::Exited { task_id, .. }
            | SupervisorEvent::ProcessError { task_id, .. } => *task_id,
        }
    }
}
