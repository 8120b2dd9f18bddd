//! Tracing subscriber setup.

use std::path::Path;
use taskerino_core::Result;
use taskerino_core::config::LoggingSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber: stderr always, plus a daily rolling file
/// when `logging.directory` is set (or `fallback_dir` is given).
///
/// `RUST_LOG` overrides `logging.level`. Calling this when a subscriber is
/// already installed is not an error; the existing one stays in place.
///
/// # Returns
///
/// The file writer's guard. Keep it alive for as long as logs should be
/// flushed to disk.
pub fn init_tracing(
    settings: &LoggingSettings,
    fallback_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter(&settings.level));

    let log_dir = settings.directory.as_deref().or(fallback_dir);
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &settings.file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(env_filter(&settings.level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("[Logging] Global subscriber already installed");
    }

    if let Some(dir) = log_dir {
        tracing::info!("[Logging] Writing logs to {}", dir.display());
    }
    Ok(guard)
}
