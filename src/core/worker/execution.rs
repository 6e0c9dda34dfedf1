use super::{wait_for_stop, ProtocolWriter, TaskWorker, WorkerExit};
use crate::core::{ProgressSnapshot, Task, WorkerMessage};
use crate::errors::Error;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncWrite, Lines};
use tracing::{debug, info};

impl TaskWorker {
    /// Runs every page of `task_id`.
    ///
    /// The outer `Result` carries output failures; the inner one carries the
    /// task failure message that will be sent as `ERROR`.
    pub(super) async fn execute<R, W>(
        &self,
        task_id: i32,
        commands: &mut Lines<R>,
        channel: &mut ProtocolWriter<W>,
    ) -> Result<Result<WorkerExit, String>, Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let task = match self.database.with_repo(|repo| repo.get_by_id(task_id)) {
            Ok(Some(task)) => task,
            Ok(None) => return Ok(Err(Error::NotFound(task_id).to_string())),
            Err(e) => return Ok(Err(format!("failed to load task: {}", e))),
        };
        let adapter = match self.adapters.get_adapter(&task.platform) {
            Ok(adapter) => adapter,
            Err(e) => return Ok(Err(e.to_string())),
        };

        let total_pages = task.max_pages.max(1);
        let delay = Duration::from_millis(u64::from(task.delay_ms));
        let started = Instant::now();
        let mut results_count: u64 = 0;

        info!(
            task_id,
            platform = adapter.name(),
            total_pages,
            "Scraping '{}' in {}",
            task.keywords.join(", "),
            task.location
        );

        for page in 1..=total_pages {
            let scraped = tokio::select! {
                rows = adapter.scrape_page(&task, page) => rows,
                _ = wait_for_stop(commands) => {
                    info!(task_id, page, "Stop requested while scraping");
                    return Ok(Ok(WorkerExit::Stopped));
                }
            };
            let rows = match scraped {
                Ok(rows) => rows,
                Err(e) => return Ok(Err(format!("page {}: {}", page, e))),
            };

            if let Err(e) = self.store_rows(&task, &rows) {
                return Ok(Err(format!("failed to store results of page {}: {}", page, e)));
            }
            results_count += rows.len() as u64;
            debug!(task_id, page, rows = rows.len(), "Page scraped");

            let progress = snapshot(page, total_pages, results_count, started.elapsed(), delay);
            channel.send(&WorkerMessage::Progress(progress)).await?;

            if page < total_pages && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_for_stop(commands) => {
                        info!(task_id, page, "Stop requested between pages");
                        return Ok(Ok(WorkerExit::Stopped));
                    }
                }
            }
        }

        channel.send(&WorkerMessage::Completed {}).await?;
        info!(task_id, results_count, "Task finished");
        Ok(Ok(WorkerExit::Completed))
    }

    fn store_rows(&self, task: &Task, rows: &[serde_json::Value]) -> Result<(), Error> {
        self.database.with_repo(|repo| {
            for row in rows {
                repo.insert_result(task.id, row)?;
            }
            Ok(())
        })
    }
}

/// Progress after `page` pages; the remaining time extrapolates the average
/// page duration plus the configured delay
fn snapshot(
    page: u32,
    total_pages: u32,
    results_count: u64,
    elapsed: Duration,
    delay: Duration,
) -> ProgressSnapshot {
    let remaining_pages = total_pages.saturating_sub(page);
    let per_page = elapsed / page.max(1);
    let remaining = (per_page + delay) * remaining_pages;

    ProgressSnapshot {
        current_page: page,
        total_pages,
        results_count,
        percentage: f64::from(page) / f64::from(total_pages) * 100.0,
        estimated_time_remaining: Some(remaining.as_secs()),
    }
}
