use clap::{Parser, Subcommand};

/// Command line interface for the application
#[derive(Parser)]
#[command(version, about = "Supervises scraping tasks, one worker process per task")]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Sets the logging verbosity level for the application
    /// Possible values: "error", "warn", "info", "debug", "trace"
    /// Default: "info"
    #[arg(long, global = true, default_value_t = String::from("info"))]
    pub logging_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Runs the supervisor and the HTTP API
    Serve {
        /// Overrides the configured API port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Runs one task in this process, driven over stdin/stdout by the supervisor
    Worker,
    /// Creates a pending task from a YAML definition
    Create {
        #[arg(short, long)]
        file: String,
    },
    /// Lists stored tasks
    List {
        /// Only show tasks in this status (pending, in_progress, paused, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
        /// created_desc, created_asc, name_asc, name_desc or status
        #[arg(long, default_value_t = String::from("created_desc"))]
        sort: String,
    },
}
