use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Where log output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget<'a> {
    /// Console plus a daily rotating file in the given directory
    ConsoleAndFile(&'a str),
    /// stderr only. Worker processes use this since stdout carries the protocol.
    Stderr,
}

/// Initialize the logging system with the specified log level.
///
/// # Arguments
///
/// * `log_level` - The desired log level as a string (e.g. "info", "debug", "warn")
/// * `target` - Where to write the logs
///
/// # Example
///
/// ```
/// init_logging("info", LogTarget::ConsoleAndFile("logs"));
/// ```
pub fn init_logging(log_level: &str, target: LogTarget<'_>) {
    let filter = match EnvFilter::try_new(log_level) {
        Ok(f) => f,
        Err(_) => {
            eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
            EnvFilter::new("info")
        }
    };

    match target {
        LogTarget::ConsoleAndFile(log_dir) => {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "scrapevisor.log");

            let stdout_layer = fmt::layer().with_line_number(true);
            let file_layer = fmt::layer()
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
        }
        LogTarget::Stderr => {
            let stderr_layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(std::io::stderr);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
    }
}
