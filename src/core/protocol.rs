//! Line protocol spoken between the supervisor and a worker process.
//!
//! Every envelope is one JSON object on its own line, discriminated by a
//! `type` field. The supervisor writes [`SupervisorMessage`]s to the worker's
//! stdin and reads [`WorkerMessage`]s from its stdout.

use crate::errors::Error;
use serde::{Deserialize, Serialize};

/// Latest progress reported by a worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub current_page: u32,
    pub total_pages: u32,
    pub results_count: u64,
    pub percentage: f64,
    /// Seconds, when the worker can estimate it
    #[serde(default)]
    pub estimated_time_remaining: Option<u64>,
}

impl ProgressSnapshot {
    pub fn finished(total_pages: u32, results_count: u64) -> Self {
        Self {
            current_page: total_pages,
            total_pages,
            results_count,
            percentage: 100.0,
            estimated_time_remaining: Some(0),
        }
    }
}

/// Supervisor → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorMessage {
    Start {
        #[serde(rename = "taskId")]
        task_id: i32,
    },
    /// Cooperative termination request
    Stop {},
}

/// Worker → supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    Progress(ProgressSnapshot),
    Completed {},
    Error { message: String },
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Progress(_))
    }
}

/// Serializes a message as one protocol line, newline included
pub fn encode<T: Serialize>(message: &T) -> Result<String, Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line read from a worker. Anything that is not a known
/// envelope is reported as [`Error::Protocol`] so the caller can log and skip it.
pub fn decode_worker_line(line: &str) -> Result<WorkerMessage, Error> {
    serde_json::from_str(line.trim())
        .map_err(|e| Error::Protocol(format!("unrecognised worker line '{}': {}", line.trim(), e)))
}

pub fn decode_supervisor_line(line: &str) -> Result<SupervisorMessage, Error> {
    serde_json::from_str(line.trim()).map_err(|e| {
        Error::Protocol(format!(
            "unrecognised supervisor line '{}': {}",
            line.trim(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_uses_camel_case_task_id() {
        let line = encode(&SupervisorMessage::Start { task_id: 7 }).unwrap();
        assert_eq!(line, "{\"type\":\"START\",\"taskId\":7}\n");
    }

    #[test]
    fn progress_fields_are_flattened_next_to_the_tag() {
        let message = decode_worker_line(
            r#"{"type":"PROGRESS","currentPage":1,"totalPages":2,"resultsCount":10,"percentage":50.0,"estimatedTimeRemaining":3}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            WorkerMessage::Progress(ProgressSnapshot {
                current_page: 1,
                total_pages: 2,
                results_count: 10,
                percentage: 50.0,
                estimated_time_remaining: Some(3),
            })
        );
        assert!(!message.is_terminal());
    }

    #[test]
    fn terminal_messages_decode() {
        assert_eq!(
            decode_worker_line("{\"type\":\"COMPLETED\"}\n").unwrap(),
            WorkerMessage::Completed {}
        );
        assert_eq!(
            decode_worker_line(r#"{"type":"ERROR","message":"blocked"}"#).unwrap(),
            WorkerMessage::Error {
                message: "blocked".into()
            }
        );
    }

    #[test]
    fn unknown_types_and_noise_are_protocol_errors() {
        assert!(matches!(
            decode_worker_line(r#"{"type":"HEARTBEAT"}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            decode_worker_line("Launching browser..."),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn stop_round_trips() {
        let line = encode(&SupervisorMessage::Stop {}).unwrap();
        assert_eq!(decode_supervisor_line(&line).unwrap(), SupervisorMessage::Stop {});
    }
}
