use super::task_state::TaskStatus;
use crate::db::{TaskRecord, TaskResultRecord};
use crate::errors::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Default number of listing pages crawled per task
pub const DEFAULT_MAX_PAGES: u32 = 1;
/// Default concurrency hint handed to the worker
pub const DEFAULT_CONCURRENCY: u32 = 1;
/// Default pause between two page requests, in milliseconds
pub const DEFAULT_DELAY_MS: u32 = 2000;

/// Proxy settings forwarded to the worker's browser engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://10.0.0.1:3128` or `socks5://host:1080`
    pub server: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    fn validate(&self) -> Result<(), Error> {
        let parsed = url::Url::parse(&self.server)
            .map_err(|e| Error::Validation(format!("invalid proxy server '{}': {}", self.server, e)))?;
        match parsed.scheme() {
            "http" | "https" | "socks5" => Ok(()),
            other => Err(Error::Validation(format!(
                "unsupported proxy scheme '{}'",
                other
            ))),
        }
    }
}

/// A persisted unit of scraping work
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i32,
    pub name: String,
    pub platform: String,
    pub keywords: Vec<String>,
    pub location: String,
    pub max_pages: u32,
    pub concurrency: u32,
    pub delay_ms: u32,
    pub headless: bool,
    pub proxy: Option<ProxyConfig>,
    pub account_ref: Option<String>,
    pub status: TaskStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_log: Option<String>,
    pub run_log: Option<String>,
    pub worker_pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input accepted when creating a task.
///
/// Required fields default to empty values so that a missing field is
/// reported by [`NewTask::validate`] with its name rather than by the decoder.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTask {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<u32>,
    #[serde(default)]
    pub delay_ms: Option<u32>,
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub account_ref: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewTask {
    /// Checks required fields and value ranges
    pub fn validate(&self) -> Result<(), Error> {
        require_text("name", &self.name)?;
        require_text("platform", &self.platform)?;
        require_text("location", &self.location)?;
        validate_keywords(&self.keywords)?;
        validate_count("max_pages", self.max_pages, 1)?;
        validate_count("concurrency", self.concurrency, 1)?;
        validate_count("delay_ms", self.delay_ms, 0)?;
        if let Some(proxy) = &self.proxy {
            proxy.validate()?;
        }
        Ok(())
    }
}

/// Partial update of a task's descriptive and execution fields.
/// Unknown fields are rejected at decode time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<u32>,
    #[serde(default)]
    pub delay_ms: Option<u32>,
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub proxy: Option<Option<ProxyConfig>>,
    #[serde(default, deserialize_with = "double_option")]
    pub account_ref: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(platform) = &self.platform {
            require_text("platform", platform)?;
        }
        if let Some(location) = &self.location {
            require_text("location", location)?;
        }
        if let Some(keywords) = &self.keywords {
            validate_keywords(keywords)?;
        }
        validate_count("max_pages", self.max_pages, 1)?;
        validate_count("concurrency", self.concurrency, 1)?;
        validate_count("delay_ms", self.delay_ms, 0)?;
        if let Some(Some(proxy)) = &self.proxy {
            proxy.validate()?;
        }
        Ok(())
    }
}

/// One scraped record belonging to a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub id: i32,
    pub task_id: i32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn require_text(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("'{}' is required", field)));
    }
    Ok(())
}

fn validate_keywords(keywords: &[String]) -> Result<(), Error> {
    if keywords.is_empty() {
        return Err(Error::Validation("'keywords' is required".to_string()));
    }
    if keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(Error::Validation(
            "'keywords' must not contain blank entries".to_string(),
        ));
    }
    Ok(())
}

/// Counts are stored in signed 32-bit columns
fn validate_count(field: &str, value: Option<u32>, min: u32) -> Result<(), Error> {
    match value {
        Some(value) if value < min => Err(Error::Validation(format!(
            "'{}' must be at least {}",
            field, min
        ))),
        Some(value) if i32::try_from(value).is_err() => Err(Error::Validation(format!(
            "'{}' must not exceed {}",
            field,
            i32::MAX
        ))),
        _ => Ok(()),
    }
}

/// Converts a validated count to its column value
pub(crate) fn to_column(field: &str, value: u32) -> Result<i32, Error> {
    i32::try_from(value)
        .map_err(|_| Error::Validation(format!("'{}' must not exceed {}", field, i32::MAX)))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, Error> {
    raw.as_deref().map(parse_timestamp).transpose()
}

impl TryFrom<TaskRecord> for Task {
    type Error = Error;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let keywords: Vec<String> = serde_json::from_str(&record.keywords)?;
        let proxy = record
            .proxy_config
            .as_deref()
            .map(serde_json::from_str::<ProxyConfig>)
            .transpose()?;

        Ok(Task {
            id: record.id,
            name: record.name,
            platform: record.platform,
            keywords,
            location: record.location,
            max_pages: record.max_pages.max(0) as u32,
            concurrency: record.concurrency.max(0) as u32,
            delay_ms: record.delay_ms.max(0) as u32,
            headless: record.headless,
            proxy,
            account_ref: record.account_ref,
            status: record.status.parse()?,
            scheduled_at: parse_optional_timestamp(record.scheduled_at)?,
            completed_at: parse_optional_timestamp(record.completed_at)?,
            error_log: record.error_log,
            run_log: record.run_log,
            worker_pid: record.worker_pid.map(|pid| pid as u32),
            created_at: parse_timestamp(&record.created_at)?,
            updated_at: parse_timestamp(&record.updated_at)?,
        })
    }
}

impl TryFrom<TaskResultRecord> for TaskResult {
    type Error = Error;

    fn try_from(record: TaskResultRecord) -> Result<Self, Self::Error> {
        Ok(TaskResult {
            id: record.id,
            task_id: record.task_id,
            payload: serde_json::from_str(&record.payload)?,
            created_at: parse_timestamp(&record.created_at)?,
        })
    }
}
