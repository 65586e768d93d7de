use std::fs;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
///
/// The file layer writes JSON lines to `<logs_dir>/<process_name>.log`,
/// rotated daily. The CSV stage logs in the same directory are separate and
/// written by `StageLogger`.
pub fn init_logging(logs_dir: &Path, process_name: &str) {
    // Ensure logs directory exists
    let _ = fs::create_dir_all(logs_dir);

    // Create a non-blocking file appender for daily log rotation
    let file_appender =
        tracing_appender::rolling::daily(logs_dir, format!("{}.log", process_name));
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Create a JSON layer for file logging
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    // Create a formatted layer for console logging
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tabular_etl=info"));

    // Set the global default subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // The stage processes run until killed; keep the guard so buffered lines flush
    std::mem::forget(guard);
}
