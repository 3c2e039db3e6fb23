//! Structured logging with configurable output format and destination.

use crate::config::LoggingConfig;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the logging subsystem based on configuration.
///
/// Returns a guard that must be held for the duration of the program
/// to ensure all logs are flushed.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config.level);
    let (writer, guard) = match config.file.as_deref() {
        Some(path) => match create_file_writer(path) {
            Ok((writer, guard)) => (BoxMakeWriter::new(writer), Some(guard)),
            Err(e) => {
                eprintln!(
                    "Warning: Could not open log file {}: {e}; logging to stdout",
                    path.display()
                );
                (BoxMakeWriter::new(io::stdout), None)
            }
        },
        None => (BoxMakeWriter::new(io::stdout), None),
    };

    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    let layer = if config.format == "json" {
        layer.json().with_filter(filter).boxed()
    } else {
        layer.with_filter(filter).boxed()
    };
    tracing_subscriber::registry().with(layer).init();

    guard
}

/// Build an EnvFilter from the configured log level.
fn build_filter(level: &str) -> EnvFilter {
    // RUST_LOG wins over config
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    EnvFilter::try_new(format!("{level},tokio=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Non-blocking appender for a single, never-rotated log file.
fn create_file_writer(
    path: &Path,
) -> io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    let dir = dir.unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy().into_owned())
        .build(dir)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    Ok(tracing_appender::non_blocking(appender))
}
