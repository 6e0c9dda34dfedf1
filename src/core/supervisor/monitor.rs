use crate::core::protocol::{self, SupervisorMessage};
use crate::event::SupervisorEvent;
use std::collections::VecDeque;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc::UnboundedReceiver, mpsc::UnboundedSender, watch};
use tracing::{debug, warn};

/// How long buffered output is still read after the process has exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Instructions from the supervisor to the task watching a worker
#[derive(Debug)]
pub enum WorkerControl {
    /// Write one envelope to the worker's stdin
    Send(SupervisorMessage),
    /// Kill the process without waiting for it to cooperate
    Kill,
}

/// Owns one worker process and turns everything it does into
/// [`SupervisorEvent`]s, in the order the worker produced them.
pub(super) struct WorkerMonitor {
    pub task_id: i32,
    pub pid: u32,
    pub child: Child,
    pub stdin: Option<ChildStdin>,
    pub stdout: Lines<BufReader<ChildStdout>>,
    pub stderr: Lines<BufReader<ChildStderr>>,
    pub control: UnboundedReceiver<WorkerControl>,
    pub events: UnboundedSender<SupervisorEvent>,
    pub exited: watch::Sender<bool>,
    pub stderr_capacity: usize,
}

enum Step {
    Stdout(std::io::Result<Option<String>>),
    Stderr(std::io::Result<Option<String>>),
    Control(Option<WorkerControl>),
    Exit(std::io::Result<ExitStatus>),
}

impl WorkerMonitor {
    pub async fn run(mut self) {
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(self.stderr_capacity);
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut control_open = true;

        let outcome = loop {
            let step = tokio::select! {
                line = self.stdout.next_line(), if stdout_open => Step::Stdout(line),
                line = self.stderr.next_line(), if stderr_open => Step::Stderr(line),
                command = self.control.recv(), if control_open => Step::Control(command),
                status = self.child.wait() => Step::Exit(status),
            };

            match step {
                Step::Stdout(Ok(Some(line))) => self.forward_line(&line),
                Step::Stdout(Ok(None)) => stdout_open = false,
                Step::Stdout(Err(e)) => {
                    warn!(task_id = self.task_id, pid = self.pid, "Failed to read worker stdout: {}", e);
                    stdout_open = false;
                }
                Step::Stderr(Ok(Some(line))) => self.record_stderr(&mut stderr_tail, line),
                Step::Stderr(Ok(None)) | Step::Stderr(Err(_)) => stderr_open = false,
                Step::Control(Some(command)) => self.apply(command).await,
                Step::Control(None) => {
                    // Handle released: no STOP can follow, EOF ends the worker
                    control_open = false;
                    self.stdin = None;
                }
                Step::Exit(status) => break status,
            }
        };

        self.drain(&mut stderr_tail, stdout_open, stderr_open).await;
        let _ = self.exited.send(true);

        let event = match outcome {
            Ok(status) => {
                debug!(task_id = self.task_id, pid = self.pid, "Worker exited: {}", status);
                SupervisorEvent::Exited {
                    task_id: self.task_id,
                    pid: self.pid,
                    status,
                    stderr_tail: stderr_tail.into_iter().collect(),
                }
            }
            Err(e) => SupervisorEvent::ProcessError {
                task_id: self.task_id,
                pid: self.pid,
                error: e.to_string(),
            },
        };

        if self.events.send(event).is_err() {
            warn!(task_id = self.task_id, "Supervisor loop is gone, dropping exit event");
        }
    }

    fn forward_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match protocol::decode_worker_line(line) {
            Ok(message) => {
                if message.is_terminal() {
                    debug!(task_id = self.task_id, pid = self.pid, "Terminal message: {:?}", message);
                }
                let event = SupervisorEvent::Message {
                    task_id: self.task_id,
                    pid: self.pid,
                    message,
                };
                if self.events.send(event).is_err() {
                    warn!(task_id = self.task_id, "Supervisor loop is gone, dropping message");
                }
            }
            Err(e) => warn!(task_id = self.task_id, pid = self.pid, "Ignoring worker output: {}", e),
        }
    }

    fn record_stderr(&self, tail: &mut VecDeque<String>, line: String) {
        debug!(task_id = self.task_id, pid = self.pid, "worker: {}", line);
        if self.stderr_capacity == 0 {
            return;
        }
        if tail.len() == self.stderr_capacity {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    async fn apply(&mut self, command: WorkerControl) {
        match command {
            WorkerControl::Send(message) => {
                let is_stop = matches!(message, SupervisorMessage::Stop {});
                if let Err(e) = self.write(&message).await {
                    debug!(task_id = self.task_id, pid = self.pid, "Could not write to worker stdin: {}", e);
                }
                if is_stop {
                    // Closing stdin doubles as the stop signal for workers that only watch for EOF.
                    self.stdin = None;
                }
            }
            WorkerControl::Kill => {
                if let Err(e) = self.child.start_kill() {
                    debug!(task_id = self.task_id, pid = self.pid, "Kill failed: {}", e);
                }
            }
        }
    }

    async fn write(&mut self, message: &SupervisorMessage) -> Result<(), crate::errors::Error> {
        let line = protocol::encode(message)?;
        if let Some(stdin) = self.stdin.as_mut() {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
        }
        Ok(())
    }

    /// Reads whatever the worker wrote before exiting, so a final
    /// `COMPLETED` is seen before the exit event.
    async fn drain(&mut self, tail: &mut VecDeque<String>, stdout_open: bool, stderr_open: bool) {
        let task_id = self.task_id;
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            if stdout_open {
                while let Ok(Some(line)) = self.stdout.next_line().await {
                    self.forward_line(&line);
                }
            }
            if stderr_open {
                while let Ok(Some(line)) = self.stderr.next_line().await {
                    self.record_stderr(tail, line);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(task_id, "Worker output still open after exit, giving up on draining");
        }
    }
}
