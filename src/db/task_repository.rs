use crate::core::{NewTask, Task, TaskResult, TaskStatus, TaskUpdate};
use crate::core::{to_column, DEFAULT_CONCURRENCY, DEFAULT_DELAY_MS, DEFAULT_MAX_PAGES};
use crate::db::models::{NewTaskRecord, TaskChangeset, TaskRecord, TaskResultRecord};
use crate::errors::Error;
use crate::schema::{task_results, tasks};
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Deserialize;
use std::str::FromStr;

const TERMINAL: [TaskStatus; 2] = [TaskStatus::Completed, TaskStatus::Failed];

/// Ordering applied to task listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum TaskSort {
    /// Newest first by creation time
    #[default]
    CreatedDesc,
    CreatedAsc,
    NameAsc,
    NameDesc,
    Status,
}

impl FromStr for TaskSort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_desc" | "newest" => Ok(TaskSort::CreatedDesc),
            "created_asc" | "oldest" => Ok(TaskSort::CreatedAsc),
            "name_asc" | "name" => Ok(TaskSort::NameAsc),
            "name_desc" => Ok(TaskSort::NameDesc),
            "status" => Ok(TaskSort::Status),
            other => Err(Error::InvalidSort(other.to_string())),
        }
    }
}

impl TryFrom<String> for TaskSort {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Paging and filtering for [`TaskRepository::list`]
#[derive(Debug, Clone, Copy)]
pub struct ListQuery {
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
    pub sort: TaskSort,
    pub status: Option<TaskStatus>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            sort: TaskSort::default(),
            status: None,
        }
    }
}

/// Repository for managing task records in the SQLite database
pub struct TaskRepository<'a> {
    /// Database connection
    pub conn: &'a mut SqliteConnection,
}

impl<'a> TaskRepository<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        TaskRepository { conn }
    }

    /// Inserts a new task with status `pending` and returns its id
    ///
    /// # Arguments
    ///
    /// * `new_task` - Descriptive and execution fields of the task
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` when a required field is missing, or an
    /// Error if database operations fail
    pub fn create(&mut self, new_task: &NewTask) -> Result<i32, Error> {
        new_task.validate()?;

        let now = Utc::now().to_rfc3339();
        let record = NewTaskRecord {
            name: new_task.name.trim().to_string(),
            platform: new_task.platform.trim().to_string(),
            keywords: serde_json::to_string(&new_task.keywords)?,
            location: new_task.location.trim().to_string(),
            max_pages: to_column("max_pages", new_task.max_pages.unwrap_or(DEFAULT_MAX_PAGES))?,
            concurrency: to_column(
                "concurrency",
                new_task.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            )?,
            delay_ms: to_column("delay_ms", new_task.delay_ms.unwrap_or(DEFAULT_DELAY_MS))?,
            headless: new_task.headless.unwrap_or(true),
            proxy_config: new_task
                .proxy
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            account_ref: new_task.account_ref.clone(),
            status: TaskStatus::Pending.to_string(),
            scheduled_at: new_task.scheduled_at.map(|at| at.to_rfc3339()),
            created_at: now.clone(),
            updated_at: now,
        };

        self.conn.transaction::<_, Error, _>(|conn| {
            diesel::insert_into(tasks::table)
                .values(&record)
                .execute(conn)?;
            let id = tasks::table
                .select(tasks::id)
                .order(tasks::id.desc())
                .first::<i32>(conn)?;
            Ok(id)
        })
    }

    /// Retrieves a single task by primary key, `None` when it does not exist
    pub fn get_by_id(&mut self, id: i32) -> Result<Option<Task>, Error> {
        tasks::table
            .find(id)
            .select(TaskRecord::as_select())
            .first::<TaskRecord>(self.conn)
            .optional()?
            .map(Task::try_from)
            .transpose()
    }

    /// Applies a partial update, serializing structured fields to JSON text
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the task does not exist
    pub fn update(&mut self, id: i32, update: &TaskUpdate) -> Result<(), Error> {
        update.validate()?;

        let changeset = TaskChangeset {
            name: update.name.as_ref().map(|n| n.trim().to_string()),
            platform: update.platform.as_ref().map(|p| p.trim().to_string()),
            keywords: update
                .keywords
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            location: update.location.as_ref().map(|l| l.trim().to_string()),
            max_pages: update
                .max_pages
                .map(|v| to_column("max_pages", v))
                .transpose()?,
            concurrency: update
                .concurrency
                .map(|v| to_column("concurrency", v))
                .transpose()?,
            delay_ms: update
                .delay_ms
                .map(|v| to_column("delay_ms", v))
                .transpose()?,
            headless: update.headless,
            proxy_config: match &update.proxy {
                Some(Some(proxy)) => Some(Some(serde_json::to_string(proxy)?)),
                Some(None) => Some(None),
                None => None,
            },
            account_ref: update.account_ref.clone(),
            scheduled_at: update
                .scheduled_at
                .map(|at| at.map(|at| at.to_rfc3339())),
            updated_at: Utc::now().to_rfc3339(),
        };

        let affected = diesel::update(tasks::table.find(id))
            .set(&changeset)
            .execute(self.conn)?;
        expect_row(affected, id)
    }

    /// Moves a task from `from` to `to`. Any status other than `in_progress`
    /// detaches the worker pid in the same statement.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` when the stored status is no longer
    /// `from`, so a concurrent transition is never overwritten
    pub fn update_status(&mut self, id: i32, from: TaskStatus, to: TaskStatus) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339();
        let target = tasks::table
            .find(id)
            .filter(tasks::status.eq(from.as_str()));

        let affected = if to == TaskStatus::InProgress {
            diesel::update(target)
                .set((tasks::status.eq(to.as_str()), tasks::updated_at.eq(&now)))
                .execute(self.conn)?
        } else {
            diesel::update(target)
                .set((
                    tasks::status.eq(to.as_str()),
                    tasks::worker_pid.eq(None::<i32>),
                    tasks::updated_at.eq(&now),
                ))
                .execute(self.conn)?
        };
        self.expect_transition(affected, id, to)
    }

    /// Marks a `pending` or `paused` task `in_progress` and records the pid of its worker
    pub fn attach_worker(&mut self, id: i32, pid: u32) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339();
        let affected = diesel::update(
            tasks::table
                .find(id)
                .filter(tasks::status.eq_any(statuses(&[TaskStatus::Pending, TaskStatus::Paused]))),
        )
        .set((
            tasks::status.eq(TaskStatus::InProgress.as_str()),
            tasks::worker_pid.eq(Some(pid as i32)),
            tasks::error_log.eq(None::<String>),
            tasks::updated_at.eq(&now),
        ))
        .execute(self.conn)?;
        self.expect_transition(affected, id, TaskStatus::InProgress)
    }

    /// Sets status `completed` and stamps `completed_at`. Terminal tasks are left alone.
    pub fn set_completion(&mut self, id: i32) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339();
        let target = tasks::table
            .find(id)
            .filter(tasks::status.ne_all(statuses(&TERMINAL)));
        let affected = diesel::update(target)
            .set((
                tasks::status.eq(TaskStatus::Completed.as_str()),
                tasks::completed_at.eq(Some(now.clone())),
                tasks::worker_pid.eq(None::<i32>),
                tasks::updated_at.eq(&now),
            ))
            .execute(self.conn)?;
        self.expect_transition(affected, id, TaskStatus::Completed)
    }

    /// Sets status `failed` and stores the error log in one write. Terminal
    /// tasks are left alone.
    pub fn set_failure(&mut self, id: i32, error_log: &str) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339();
        let target = tasks::table
            .find(id)
            .filter(tasks::status.ne_all(statuses(&TERMINAL)));
        let affected = diesel::update(target)
            .set((
                tasks::status.eq(TaskStatus::Failed.as_str()),
                tasks::error_log.eq(Some(error_log)),
                tasks::worker_pid.eq(None::<i32>),
                tasks::updated_at.eq(&now),
            ))
            .execute(self.conn)?;
        self.expect_transition(affected, id, TaskStatus::Failed)
    }

    pub fn set_run_log(&mut self, id: i32, text: &str) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339();
        let affected = diesel::update(tasks::table.find(id))
            .set((tasks::run_log.eq(Some(text)), tasks::updated_at.eq(&now)))
            .execute(self.conn)?;
        expect_row(affected, id)
    }

    /// Puts a finished task back to `pending`, clearing the outcome and the
    /// results of the previous run
    pub fn reset_for_retry(&mut self, id: i32) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339();
        let affected = self.conn.transaction::<_, Error, _>(|conn| {
            let affected = diesel::update(
                tasks::table
                    .find(id)
                    .filter(tasks::status.eq_any(statuses(&TERMINAL))),
            )
            .set((
                tasks::status.eq(TaskStatus::Pending.as_str()),
                tasks::error_log.eq(None::<String>),
                tasks::completed_at.eq(None::<String>),
                tasks::worker_pid.eq(None::<i32>),
                tasks::updated_at.eq(&now),
            ))
            .execute(conn)?;
            if affected > 0 {
                diesel::delete(task_results::table.filter(task_results::task_id.eq(id)))
                    .execute(conn)?;
            }
            Ok(affected)
        })?;
        self.expect_transition(affected, id, TaskStatus::Pending)
    }

    /// Returns one page of tasks
    ///
    /// # Arguments
    ///
    /// * `query` - 1-based page, page size, ordering and optional status filter
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a zero page or page size
    pub fn list(&mut self, query: &ListQuery) -> Result<Vec<Task>, Error> {
        if query.page == 0 || query.page_size == 0 {
            return Err(Error::Validation(
                "page and page_size start at 1".to_string(),
            ));
        }

        let mut statement = tasks::table.select(TaskRecord::as_select()).into_boxed();
        if let Some(status) = query.status {
            statement = statement.filter(tasks::status.eq(status.as_str()));
        }
        statement = match query.sort {
            TaskSort::CreatedDesc => statement.order((tasks::created_at.desc(), tasks::id.desc())),
            TaskSort::CreatedAsc => statement.order((tasks::created_at.asc(), tasks::id.asc())),
            TaskSort::NameAsc => statement.order((tasks::name.asc(), tasks::id.asc())),
            TaskSort::NameDesc => statement.order((tasks::name.desc(), tasks::id.desc())),
            TaskSort::Status => statement.order((tasks::status.asc(), tasks::id.desc())),
        };

        let offset = i64::from(query.page - 1) * i64::from(query.page_size);
        let records = statement
            .limit(i64::from(query.page_size))
            .offset(offset)
            .load::<TaskRecord>(self.conn)?;

        records.into_iter().map(Task::try_from).collect()
    }

    pub fn count(&mut self) -> Result<i64, Error> {
        Ok(tasks::table.count().get_result(self.conn)?)
    }

    pub fn count_by_status(&mut self, status: TaskStatus) -> Result<i64, Error> {
        Ok(tasks::table
            .filter(tasks::status.eq(status.as_str()))
            .count()
            .get_result(self.conn)?)
    }

    /// Retrieves all tasks in the given status, oldest first
    pub fn list_by_status(&mut self, status: TaskStatus) -> Result<Vec<Task>, Error> {
        let records = tasks::table
            .filter(tasks::status.eq(status.as_str()))
            .order(tasks::id.asc())
            .select(TaskRecord::as_select())
            .load::<TaskRecord>(self.conn)?;

        records.into_iter().map(Task::try_from).collect()
    }

    /// Deletes a task together with its results
    pub fn delete(&mut self, id: i32) -> Result<(), Error> {
        self.conn.transaction::<_, Error, _>(|conn| {
            diesel::delete(task_results::table.filter(task_results::task_id.eq(id)))
                .execute(conn)?;
            let affected = diesel::delete(tasks::table.find(id)).execute(conn)?;
            expect_row(affected, id)
        })
    }

    /// Appends one scraped record to a task
    pub fn insert_result(&mut self, task_id: i32, payload: &serde_json::Value) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339();
        diesel::insert_into(task_results::table)
            .values((
                task_results::task_id.eq(task_id),
                task_results::payload.eq(payload.to_string()),
                task_results::created_at.eq(&now),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    /// Retrieves all results of a task in insertion order
    pub fn list_results(&mut self, task_id: i32) -> Result<Vec<TaskResult>, Error> {
        let records = task_results::table
            .filter(task_results::task_id.eq(task_id))
            .order(task_results::id.asc())
            .select(TaskResultRecord::as_select())
            .load::<TaskResultRecord>(self.conn)?;

        records.into_iter().map(TaskResult::try_from).collect()
    }

    pub fn count_results(&mut self, task_id: i32) -> Result<i64, Error> {
        Ok(task_results::table
            .filter(task_results::task_id.eq(task_id))
            .count()
            .get_result(self.conn)?)
    }

    /// Turns a conditional write that matched nothing into `NotFound` or
    /// an `InvalidTransition` from the status actually stored
    fn expect_transition(&mut self, affected: usize, id: i32, to: TaskStatus) -> Result<(), Error> {
        if affected > 0 {
            return Ok(());
        }
        let current = tasks::table
            .find(id)
            .select(tasks::status)
            .first::<String>(self.conn)
            .optional()?;
        match current {
            Some(status) => Err(Error::InvalidTransition {
                id,
                from: status.parse()?,
                action: to.entry_verb(),
            }),
            None => Err(Error::NotFound(id)),
        }
    }
}

fn statuses(list: &[TaskStatus]) -> Vec<&'static str> {
    list.iter().map(|status| status.as_str()).collect()
}

fn expect_row(affected: usize, id: i32) -> Result<(), Error> {
    if affected == 0 {
        return Err(Error::NotFound(id));
    }
    Ok(())
}
