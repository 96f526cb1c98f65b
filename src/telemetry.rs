use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogLevel;

const MAX_LOG_FILES: usize = 4;

/// Keeps the non-blocking writer flushing until dropped.
pub struct TelemetryGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileLayout {
    pub dir: PathBuf,
    pub prefix: String,
    pub suffix: Option<String>,
}

/// Splits `logs/app_updates.log` into directory `logs`, prefix `app_updates`
/// and suffix `log`; rotated files become `app_updates.<date>.log`.
pub fn log_file_layout(log_file: &Path) -> LogFileLayout {
    let dir = match log_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = log_file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "appwatch".to_string());
    let suffix = log_file
        .extension()
        .map(|s| s.to_string_lossy().to_string());
    LogFileLayout {
        dir,
        prefix,
        suffix,
    }
}

pub fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter_directive()))
}

pub fn init(log_file: &Path, level: LogLevel) -> anyhow::Result<TelemetryGuard> {
    let layout = log_file_layout(log_file);
    std::fs::create_dir_all(&layout.dir)
        .with_context(|| format!("create log dir {}", layout.dir.display()))?;

    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(layout.prefix.as_str())
        .max_log_files(MAX_LOG_FILES);
    if let Some(suffix) = layout.suffix.as_deref() {
        builder = builder.filename_suffix(suffix);
    }
    let appender = builder
        .build(&layout.dir)
        .with_context(|| format!("open log file under {}", layout.dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .context("install tracing subscriber")?;

    Ok(TelemetryGuard { _guard: guard })
}
