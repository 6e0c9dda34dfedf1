mod models;
mod task_repository;

use crate::errors::Error;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use models::*;
pub use task_repository::*;

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_create_tasks.sql");

/// Applied to every pooled connection. The supervisor, the API handlers and
/// the worker processes all write to the same file, so writers wait on the
/// lock instead of failing with SQLITE_BUSY.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl Database {
    /// Opens (or creates) the SQLite file at `db_path` and ensures the schema exists
    pub fn new(db_path: &str) -> Result<Self, Error> {
        let manager = ConnectionManager::<SqliteConnection>::new(db_path);
        let pool = Pool::builder()
            .connection_timeout(Duration::from_secs(10))
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)?;

        let database = Database {
            pool: Arc::new(pool),
        };
        database.migrate()?;
        debug!("Database ready at {}", db_path);
        Ok(database)
    }

    pub fn get_conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, Error> {
        Ok(self.pool.get()?)
    }

    /// Checks out a connection and runs `f` against a repository bound to it
    pub fn with_repo<T>(
        &self,
        f: impl FnOnce(&mut TaskRepository<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut conn = self.get_conn()?;
        let mut repo = TaskRepository::new(&mut conn);
        f(&mut repo)
    }

    fn migrate(&self) -> Result<(), Error> {
        let mut conn = self.get_conn()?;
        conn.batch_execute(SCHEMA_SQL)?;
        Ok(())
    }
}
