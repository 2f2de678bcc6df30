//! File logging for the CLI.
//!
//! Diagnostics go to a daily rolling file under `client-logs/` so they never
//! mix with session logs or with command output on stdout.

use fs_err as fs;
use steplogger_core::AppPaths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "steplogger.log";

/// Installs the subscriber. The returned guard must live until exit so the
/// writer can flush; `None` means logging is disabled for this run.
pub fn init(paths: &AppPaths) -> Option<WorkerGuard> {
    let dir = paths.client_log_dir();
    if let Err(err) = fs::create_dir_all(&dir) {
        eprintln!("steplogger: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;

    Some(guard)
}
