mod parser;

use crate::core::{SupervisorOptions, WorkerCommand};
use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use parser::{load_app_config, load_new_task};

/// Environment variable naming the SQLite file; also exported to workers
pub const DATABASE_PATH_ENV: &str = "DATABASE_PATH";
pub const API_PORT_ENV: &str = "API_PORT";
pub const GRACE_PERIOD_ENV: &str = "WORKER_GRACE_PERIOD";
pub const LOG_DIR_ENV: &str = "LOG_DIR";

/// Subcommand the supervisor passes to its own executable to start a worker
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Application settings, read from an optional YAML file and the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Path of the SQLite database shared by the server and its workers
    pub database_path: String,
    /// Port of the HTTP API
    pub api_port: u16,
    /// Directory of the daily rolling log files
    pub log_dir: String,
    /// Time a stopped worker gets to exit before it is killed, e.g. `5s`
    pub grace_period: String,
    /// Number of worker stderr lines kept as the task's run log
    pub stderr_tail_lines: usize,
    /// Worker executable; the running binary when unset
    pub worker_program: Option<String>,
    /// Worker arguments; `["worker"]` when unset
    pub worker_args: Option<Vec<String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "scrapevisor.db".to_string(),
            api_port: 3000,
            log_dir: "logs".to_string(),
            grace_period: "5s".to_string(),
            stderr_tail_lines: 50,
            worker_program: None,
            worker_args: None,
        }
    }
}

impl AppConfig {
    pub fn grace_period(&self) -> Result<Duration, Error> {
        humantime::parse_duration(&self.grace_period).map_err(|e| {
            Error::Validation(format!(
                "invalid grace period '{}': {}",
                self.grace_period, e
            ))
        })
    }

    /// Builds the supervisor settings, resolving the worker executable
    pub fn supervisor_options(&self) -> Result<SupervisorOptions, Error> {
        let program = match &self.worker_program {
            Some(program) => PathBuf::from(program),
            None => std::env::current_exe()?,
        };
        let args = self
            .worker_args
            .clone()
            .unwrap_or_else(|| vec![WORKER_SUBCOMMAND.to_string()]);

        Ok(SupervisorOptions {
            worker: WorkerCommand { program, args },
            database_path: self.database_path.clone(),
            grace_period: self.grace_period()?,
            stderr_tail_lines: self.stderr_tail_lines,
        })
    }

    /// Applies environment overrides, reading variables through `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), Error> {
        if let Some(path) = lookup(DATABASE_PATH_ENV) {
            self.database_path = path;
        }
        if let Some(port) = lookup(API_PORT_ENV) {
            self.api_port = port.trim().parse().map_err(|_| {
                Error::Validation(format!("{} must be a port number, got '{}'", API_PORT_ENV, port))
            })?;
        }
        if let Some(grace) = lookup(GRACE_PERIOD_ENV) {
            self.grace_period = grace;
        }
        if let Some(dir) = lookup(LOG_DIR_ENV) {
            self.log_dir = dir;
        }
        self.grace_period()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn environment_wins_over_file_values() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            (DATABASE_PATH_ENV, "/tmp/other.db"),
            (API_PORT_ENV, "8088"),
            (GRACE_PERIOD_ENV, "750ms"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.database_path, "/tmp/other.db");
        assert_eq!(config.api_port, 8088);
        assert_eq!(config.grace_period().unwrap(), Duration::from_millis(750));
        assert_eq!(config.log_dir, "logs");
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.apply_overrides(|key| (key == API_PORT_ENV).then(|| "http".to_string())),
            Err(Error::Validation(_))
        ));

        let mut config = AppConfig::default();
        assert!(config
            .apply_overrides(|key| (key == GRACE_PERIOD_ENV).then(|| "soon".to_string()))
            .is_err());
    }

    #[test]
    fn worker_defaults_to_current_executable() {
        let options = AppConfig::default().supervisor_options().unwrap();
        assert_eq!(options.worker.program, std::env::current_exe().unwrap());
        assert_eq!(options.worker.args, vec!["worker".to_string()]);
        assert_eq!(options.grace_period, Duration::from_secs(5));
    }
}
