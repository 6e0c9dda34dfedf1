use crate::adapters::PlatformAdapter;
use crate::core::Task;
use serde_json::{json, Value};
use std::time::Duration;

/// Rows produced per page
const ROWS_PER_PAGE: usize = 5;

/// Produces synthetic listings without touching the network. Used for smoke
/// runs of the supervisor and worker plumbing.
#[derive(Debug, Clone)]
pub struct DryRunAdapter {
    pub page_latency: Duration,
}

impl Default for DryRunAdapter {
    fn default() -> Self {
        Self {
            page_latency: Duration::from_millis(50),
        }
    }
}

#[async_trait::async_trait]
impl PlatformAdapter for DryRunAdapter {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn scrape_page(&self, task: &Task, page: u32) -> Result<Vec<Value>, String> {
        tokio::time::sleep(self.page_latency).await;

        let keyword = task.keywords.join(" ");
        Ok((0..ROWS_PER_PAGE)
            .map(|index| {
                json!({
                    "title": format!("{} #{}", keyword, (page as usize).saturating_sub(1) * ROWS_PER_PAGE + index + 1),
                    "location": task.location,
                    "page": page,
                    "platform": self.name(),
                    "dry_run": true,
                })
            })
            .collect())
    }
}
