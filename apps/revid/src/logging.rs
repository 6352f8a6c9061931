// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Console and file logging setup, layered with `tracing-subscriber` the
//! same way the upstream project's server binary does. No telemetry/OTel
//! layer: an embedded capture box has no collector to export to, and the
//! ambient stack here is scoped to local logging only.

use revid_core::config::LogLevel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type DynLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

const fn tracing_level(level: LogLevel) -> tracing::Level {
    match level {
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warning => tracing::Level::WARN,
        LogLevel::Error | LogLevel::Fatal => tracing::Level::ERROR,
    }
}

fn env_filter_or_level(default_level: tracing::Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str()))
}

fn make_console_layer(level: tracing::Level) -> DynLayer {
    tracing_subscriber::fmt::layer().with_filter(env_filter_or_level(level)).boxed()
}

fn make_file_layer(
    non_blocking: tracing_appender::non_blocking::NonBlocking,
    level: tracing::Level,
) -> DynLayer {
    tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(env_filter_or_level(level))
        .boxed()
}

/// Initializes the global `tracing` subscriber: a console layer always, and
/// a rolling-never file layer at `log_file` when one is given.
///
/// Returns the file appender's guard, which the caller must keep alive for
/// the process's lifetime or buffered log lines are lost on exit.
///
/// # Errors
/// Returns an error if `log_file`'s parent directory cannot be created.
pub fn init_logging(
    level: LogLevel,
    log_file: Option<&str>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let level = tracing_level(level);
    let mut layers: Vec<DynLayer> = vec![make_console_layer(level)];
    let mut guard = None;

    if let Some(log_file) = log_file {
        let path = std::path::Path::new(log_file);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let filename = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("revid.log"));
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("failed to create log directory {}: {e}", dir.display()))?;

        let appender = tracing_appender::rolling::never(dir, filename);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(make_file_layer(non_blocking, level));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(guard)
}
