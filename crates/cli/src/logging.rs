use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// `~/.modproxy/logs`, or `./.modproxy/logs` without a home directory.
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".modproxy/logs")
}

/// Daily log file `<dir>/<command>.<date>`, creating `dir` if needed.
fn command_log(dir: &Path, command: &str) -> io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, command);
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber for one CLI command.
///
/// Events go to the command's log file and, with `to_stderr`, to the terminal.
/// If the log directory is unusable, everything goes to stderr instead and the
/// returned guard is `None`.
pub fn init_logging(command: &str, to_stderr: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_dir = default_log_dir();

    let (file_layer, guard, failure) = match command_log(&log_dir, command) {
        Ok((writer, guard)) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    let stderr_layer = (to_stderr || failure.is_some()).then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    if let Some(e) = failure {
        warn!("Not logging to {}: {}", log_dir.display(), e);
    }
    guard
}
