use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const ERROR_LOG_FILE: &str = "tracklink_errors.log";

/// Keeps the error log writer alive; dropping it flushes pending lines.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

/// Console output filtered by `RUST_LOG` (default `info`), plus errors
/// appended to `<log_dir>/tracklink_errors.log` when `log_dir` is given.
pub fn init(log_dir: Option<&Path>) -> Result<LogGuard> {
    let console = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    let (errors, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, ERROR_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(LevelFilter::ERROR);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(errors)
        .try_init()?;

    Ok(LogGuard { _guard: guard })
}
