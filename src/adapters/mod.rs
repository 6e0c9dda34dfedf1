mod adapter_registry;
mod dry_run;

use crate::core::Task;
pub use adapter_registry::*;
pub use dry_run::*;

/// A source of listings. Adapters run inside worker processes only.
#[async_trait::async_trait]
pub trait PlatformAdapter: std::fmt::Debug + Send + Sync {
    /// Platform id matched against `Task::platform`
    fn name(&self) -> &str;

    /// Scrapes one listing page (1-based) and returns one JSON object per record
    async fn scrape_page(&self, task: &Task, page: u32) -> Result<Vec<serde_json::Value>, String>;
}
