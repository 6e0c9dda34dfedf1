//! Main entry point for the application.
//!
//! The same binary runs in two roles:
//! - `serve`: the supervisor and its HTTP API. Every started task gets its
//!   own child process running this binary in worker mode.
//! - `worker`: executes one task, driven by the supervisor over stdin/stdout.
//!
//! `create` and `list` work directly against the task store.

mod adapters;
mod api;
mod cli;
mod config;
mod core;
mod db;
mod errors;
mod event;
mod schema;
mod utils;

use crate::adapters::AdapterRegistry;
use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::core::{Supervisor, TaskManager, TaskStatus, TaskWorker};
use crate::db::{Database, ListQuery, TaskSort};
use crate::errors::Error;
use crate::utils::LogTarget;
use clap::Parser;
use colored::*;
use tracing::{debug, error, info, warn};

/// Main entry point that initializes and runs the application.
///
/// # Initialization steps:
/// 1. Parse CLI arguments
/// 2. Load environment variables and configuration
/// 3. Initialize logging system
/// 4. Run the selected command and exit with its code
#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let dotenv = dotenvy::dotenv();

    let config = match config::load_app_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Invalid configuration:".red().bold(), e);
            std::process::exit(2);
        }
    };

    let target = match cli.command {
        Command::Serve { .. } => LogTarget::ConsoleAndFile(&config.log_dir),
        _ => LogTarget::Stderr,
    };
    utils::init_logging(&cli.logging_level, target);
    if let Err(e) = dotenv {
        debug!("No .env file loaded: {}", e);
    }

    let code = match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(command: Command, config: AppConfig) -> Result<i32, Error> {
    match command {
        Command::Serve { port } => serve(config, port).await,
        Command::Worker => {
            let database = Database::new(&config.database_path)?;
            let worker = TaskWorker::new(database, AdapterRegistry::with_builtin_adapters());
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let exit = worker.run(input, tokio::io::stdout()).await?;
            debug!("Worker finished: {:?}", exit);
            Ok(exit.code())
        }
        Command::Create { file } => {
            let new_task = config::load_new_task(&file)?;
            let database = Database::new(&config.database_path)?;
            let id = database.with_repo(|repo| repo.create(&new_task))?;
            println!("{} task {} ({})", "Created".green().bold(), id, new_task.name);
            Ok(0)
        }
        Command::List {
            status,
            page,
            page_size,
            sort,
        } => {
            let query = ListQuery {
                page,
                page_size,
                sort: sort.parse::<TaskSort>()?,
                status: status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
            };
            let database = Database::new(&config.database_path)?;
            let (tasks, total) = database.with_repo(|repo| {
                let total = match query.status {
                    Some(status) => repo.count_by_status(status)?,
                    None => repo.count()?,
                };
                Ok((repo.list(&query)?, total))
            })?;

            println!(
                "{}",
                format!("{:>5}  {:<12}  {:<10}  {:<10}  {}", "ID", "STATUS", "PLATFORM", "PAGES", "NAME").bold()
            );
            for task in &tasks {
                println!(
                    "{:>5}  {:<12}  {:<10}  {:<10}  {}",
                    task.id,
                    colorize_status(task.status),
                    task.platform,
                    task.max_pages,
                    task.name
                );
            }
            println!(
                "{}",
                format!("page {} · {} of {} task(s)", page, tasks.len(), total).dimmed()
            );
            Ok(0)
        }
    }
}

async fn serve(config: AppConfig, port: Option<u16>) -> Result<i32, Error> {
    let database = Database::new(&config.database_path)?;
    let supervisor = Supervisor::launch(database.clone(), config.supervisor_options()?);
    let manager = TaskManager::new(database, supervisor);

    let recovered = manager.recover_interrupted_tasks().await?;
    if recovered > 0 {
        warn!("{} interrupted task(s) moved to paused", recovered);
    }

    let port = port.unwrap_or(config.api_port);
    info!("Starting API server on port {}", port);
    let served = api::server::launch_server(manager.clone(), port, shutdown_signal()).await;

    manager.shutdown().await;
    served?;
    Ok(0)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, stopping workers");
}

fn colorize_status(status: TaskStatus) -> ColoredString {
    let label = format!("{:<12}", status.as_str());
    match status {
        TaskStatus::Pending => label.yellow(),
        TaskStatus::InProgress => label.cyan(),
        TaskStatus::Paused => label.blue(),
        TaskStatus::Completed => label.green(),
        TaskStatus::Failed => label.red(),
    }
}
