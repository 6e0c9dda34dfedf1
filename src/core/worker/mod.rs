/// Page loop of a started task
mod execution;

use crate::adapters::AdapterRegistry;
use crate::core::protocol::{self, SupervisorMessage, WorkerMessage};
use crate::db::Database;
use crate::errors::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{info, warn};

/// How a worker run ended, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    Failed,
    /// `STOP` or end of input before the task finished
    Stopped,
}

impl WorkerExit {
    pub fn code(self) -> i32 {
        match self {
            WorkerExit::Completed | WorkerExit::Stopped => 0,
            WorkerExit::Failed => 1,
        }
    }
}

/// Runtime executed inside a worker process.
///
/// Reads supervisor envelopes from `input`, writes its own envelopes to
/// `output` and stores scraped records directly in the task store.
#[derive(Debug)]
pub struct TaskWorker {
    pub database: Database,
    pub adapters: AdapterRegistry,
}

impl TaskWorker {
    pub fn new(database: Database, adapters: AdapterRegistry) -> Self {
        Self { database, adapters }
    }

    /// Waits for `START`, runs the task and reports the outcome.
    ///
    /// # Errors
    ///
    /// Only fails when `output` cannot be written; task failures are
    /// reported as an `ERROR` envelope and [`WorkerExit::Failed`].
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<WorkerExit, Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut commands = input.lines();
        let mut channel = ProtocolWriter { output };

        let Some(task_id) = wait_for_start(&mut commands).await else {
            info!("Stopped before a task was assigned");
            return Ok(WorkerExit::Stopped);
        };
        info!(task_id, "Worker received task");

        match self.execute(task_id, &mut commands, &mut channel).await? {
            Ok(exit) => Ok(exit),
            Err(message) => {
                warn!(task_id, "Task failed: {}", message);
                channel.send(&WorkerMessage::Error { message }).await?;
                Ok(WorkerExit::Failed)
            }
        }
    }
}

/// Writes protocol envelopes, one per line, flushing after each
struct ProtocolWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> ProtocolWriter<W> {
    async fn send(&mut self, message: &WorkerMessage) -> Result<(), Error> {
        let line = protocol::encode(message)?;
        self.output.write_all(line.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}

async fn wait_for_start<R: AsyncBufRead + Unpin>(commands: &mut Lines<R>) -> Option<i32> {
    loop {
        match commands.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match protocol::decode_supervisor_line(&line) {
                Ok(SupervisorMessage::Start { task_id }) => return Some(task_id),
                Ok(SupervisorMessage::Stop {}) => return None,
                Err(e) => warn!("{}", e),
            },
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read from supervisor: {}", e);
                return None;
            }
        }
    }
}

/// Resolves once the supervisor asks to stop or goes away
async fn wait_for_stop<R: AsyncBufRead + Unpin>(commands: &mut Lines<R>) {
    loop {
        match commands.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match protocol::decode_supervisor_line(&line) {
                Ok(SupervisorMessage::Stop {}) => return,
                Ok(SupervisorMessage::Start { task_id }) => {
                    warn!(task_id, "Ignoring START while a task is running")
                }
                Err(e) => warn!("{}", e),
            },
            Ok(None) | Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DryRunAdapter, PlatformAdapter};
    use crate::core::{NewTask, Task};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::BufReader;

    #[derive(Debug)]
    struct FailingAdapter;

    #[async_trait::async_trait]
    impl PlatformAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }

        async fn scrape_page(&self, _task: &Task, page: u32) -> Result<Vec<serde_json::Value>, String> {
            if page == 1 {
                Ok(vec![serde_json::json!({"title": "only"})])
            } else {
                Err("captcha".to_string())
            }
        }
    }

    fn worker() -> (TempDir, TaskWorker) {
        let dir = TempDir::new().unwrap();
        let database = Database::new(dir.path().join("tasks.db").to_str().unwrap()).unwrap();
        let adapters = AdapterRegistry::new(vec![
            Box::new(DryRunAdapter {
                page_latency: Duration::from_millis(1),
            }) as Box<dyn PlatformAdapter>,
            Box::new(FailingAdapter) as Box<dyn PlatformAdapter>,
        ]);
        (dir, TaskWorker::new(database, adapters))
    }

    fn create(worker: &TaskWorker, platform: &str, max_pages: u32) -> i32 {
        worker
            .database
            .with_repo(|repo| {
                repo.create(&NewTask {
                    name: "worker test".to_string(),
                    platform: platform.to_string(),
                    keywords: vec!["rust".to_string()],
                    location: "Lyon".to_string(),
                    max_pages: Some(max_pages),
                    delay_ms: Some(0),
                    ..Default::default()
                })
            })
            .unwrap()
    }

    async fn run_with_input(worker: &TaskWorker, input: &str) -> (WorkerExit, Vec<WorkerMessage>) {
        let mut output = Vec::new();
        let exit = worker
            .run(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();
        let messages = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| protocol::decode_worker_line(line).unwrap())
            .collect();
        (exit, messages)
    }

    fn start_line(task_id: i32) -> String {
        protocol::encode(&SupervisorMessage::Start { task_id }).unwrap()
    }

    #[tokio::test]
    async fn completes_while_supervisor_keeps_stdin_open() {
        let (_dir, worker) = worker();
        let id = create(&worker, "dry-run", 2);

        let (mut supervisor_side, worker_side) = tokio::io::duplex(1024);
        supervisor_side
            .write_all(start_line(id).as_bytes())
            .await
            .unwrap();

        let mut output = Vec::new();
        let exit = worker
            .run(BufReader::new(worker_side), &mut output)
            .await
            .unwrap();
        assert_eq!(exit, WorkerExit::Completed);
        assert_eq!(exit.code(), 0);

        let results = worker
            .database
            .with_repo(|repo| repo.list_results(id))
            .unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].payload["page"], 1);
        drop(supervisor_side);
    }

    #[tokio::test]
    async fn stop_before_start_exits_cleanly() {
        let (_dir, worker) = worker();
        let (exit, messages) = run_with_input(&worker, "{\"type\":\"STOP\"}\n").await;
        assert_eq!(exit, WorkerExit::Stopped);
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn unknown_platform_is_reported() {
        let (_dir, worker) = worker();
        let id = create(&worker, "monster", 1);
        let (mut supervisor_side, worker_side) = tokio::io::duplex(1024);
        supervisor_side
            .write_all(start_line(id).as_bytes())
            .await
            .unwrap();

        let mut output = Vec::new();
        let exit = worker
            .run(BufReader::new(worker_side), &mut output)
            .await
            .unwrap();
        assert_eq!(exit, WorkerExit::Failed);
        assert_eq!(exit.code(), 1);
        let line = String::from_utf8(output).unwrap();
        assert_eq!(
            protocol::decode_worker_line(&line).unwrap(),
            WorkerMessage::Error {
                message: "Unknown platform 'monster'".to_string()
            }
        );
    }

    #[tokio::test]
    async fn adapter_failure_keeps_earlier_results() {
        let (_dir, worker) = worker();
        let id = create(&worker, "failing", 2);
        let (mut supervisor_side, worker_side) = tokio::io::duplex(1024);
        supervisor_side
            .write_all(start_line(id).as_bytes())
            .await
            .unwrap();

        let mut output = Vec::new();
        let exit = worker
            .run(BufReader::new(worker_side), &mut output)
            .await
            .unwrap();
        assert_eq!(exit, WorkerExit::Failed);

        let messages: Vec<WorkerMessage> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| protocol::decode_worker_line(line).unwrap())
            .collect();
        assert!(matches!(messages[0], WorkerMessage::Progress(_)));
        assert!(matches!(
            &messages[1],
            WorkerMessage::Error { message } if message.contains("captcha")
        ));
        let stored = worker
            .database
            .with_repo(|repo| repo.count_results(id))
            .unwrap();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn stop_during_run_ends_without_terminal_message() {
        let (_dir, worker) = worker();
        let id = create(&worker, "dry-run", 50);
        worker
            .database
            .with_repo(|repo| {
                repo.update(
                    id,
                    &crate::core::TaskUpdate {
                        delay_ms: Some(200),
                        ..Default::default()
                    },
                )
            })
            .unwrap();

        let (mut supervisor_side, worker_side) = tokio::io::duplex(1024);
        supervisor_side
            .write_all(start_line(id).as_bytes())
            .await
            .unwrap();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            supervisor_side
                .write_all(b"{\"type\":\"STOP\"}\n")
                .await
                .unwrap();
            supervisor_side
        });

        let mut output = Vec::new();
        let exit = worker
            .run(BufReader::new(worker_side), &mut output)
            .await
            .unwrap();
        let _supervisor_side = stopper.await.unwrap();

        assert_eq!(exit, WorkerExit::Stopped);
        let text = String::from_utf8(output).unwrap();
        assert!(!text.contains("COMPLETED"));
    }
}
