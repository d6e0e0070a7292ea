//! Tracing subscriber setup.
//!
//! Diagnostics always go to stderr; stdout belongs to the host protocol.
//! With a log directory, records are also written to a daily-rolling
//! `traceract.YYYY-MM-DD.log` file there.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Number of daily log files kept.
pub const MAX_LOG_FILES: usize = 7;

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
///
/// Returns the file writer guard, which must be kept alive for buffered
/// records to reach disk. A second call is a no-op.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let appender = log_dir.map(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("traceract")
            .filename_suffix("log")
            .max_log_files(MAX_LOG_FILES)
            .build(dir)
    });

    match appender {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        Some(Err(e)) => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init();
            tracing::warn!(category = "SERVICE", error = %e, "file logging disabled");
            None
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init();
            None
        }
    }
}
