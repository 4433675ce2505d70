//! Structured logging init, behind the `tracing-init` feature so crates that
//! only want config loading don't pull in `tracing-subscriber`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initializes a global `tracing` subscriber with an `EnvFilter` read from
/// `RUST_LOG` (default `info`), writing to stderr and, if `log_dir` is given,
/// also to a daily-rotated file under it.
///
/// Returns the file appender's [`WorkerGuard`] when file logging is enabled;
/// the caller must keep it alive for the process lifetime or buffered lines
/// are dropped on exit.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "weave.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
