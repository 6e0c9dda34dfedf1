//! Core module containing the task orchestration system
//!
//! This module contains:
//! - The task model and its lifecycle rules
//! - The line protocol spoken with worker processes
//! - The process supervisor that runs one worker per task
//! - The task manager facade used by the API and the CLI
//! - The worker runtime executed inside each child process

mod manager;
pub mod protocol;
pub mod supervisor;
mod task;
mod task_state;
mod worker;

pub use manager::*;
pub use protocol::{ProgressSnapshot, SupervisorMessage, WorkerMessage};
pub use supervisor::{Supervisor, SupervisorOptions, WorkerCommand};
pub use task::*;
pub use task_state::*;
pub use worker::*;

#[cfg(test)]
pub(crate) use manager::testing;
