//! Tracing subscriber setup for the server binary.
//!
//! Two modes, picked from `PROXIMITY_ENV`:
//! - [`LogMode::Production`] writes JSON lines to a daily rolling file and a
//!   plain compact copy to stdout for the journal.
//! - [`LogMode::Development`] writes pretty, span-annotated output to stdout.
//!
//! [`init`] hands back a [`LogGuard`]; buffered lines are flushed when it drops,
//! so `main` keeps it alive until exit.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the default log level.
pub const LOG_LEVEL_ENV: &str = "PROXIMITY_LOG_LEVEL";

/// Environment variable selecting production mode when set to `production`.
pub const ENVIRONMENT_ENV: &str = "PROXIMITY_ENV";

/// Environment variable overriding the production log directory.
pub const LOG_DIR_ENV: &str = "PROXIMITY_LOG_DIR";

const LOG_FILE_PREFIX: &str = "proximity";
const LOG_FILE_SUFFIX: &str = "log";

/// Output style of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Pretty stdout with span open/close events.
    Development,
    /// JSON rolling file plus compact stdout.
    Production,
}

impl LogMode {
    /// Mode for a raw `PROXIMITY_ENV` value.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.trim().eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }

    /// Mode for the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(ENVIRONMENT_ENV).ok().as_deref())
    }
}

/// Keeps the non-blocking writers running. Dropping it flushes pending lines.
#[must_use = "logs are lost once the guard is dropped"]
pub struct LogGuard {
    _writers: Vec<WorkerGuard>,
}

/// Install the global subscriber for `mode`.
///
/// `RUST_LOG` wins over [`LOG_LEVEL_ENV`]; with neither set the level is `info`.
///
/// # Errors
///
/// Returns an error if the filter does not parse, or in production mode if
/// the log directory cannot be created or opened for writing.
pub fn init(mode: LogMode) -> anyhow::Result<LogGuard> {
    let filter = env_filter()?;
    match mode {
        LogMode::Production => init_production(filter, &log_directory()),
        LogMode::Development => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
                )
                .try_init()?;
            Ok(LogGuard {
                _writers: Vec::new(),
            })
        }
    }
}

fn env_filter() -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    EnvFilter::try_new(&level).with_context(|| format!("invalid {LOG_LEVEL_ENV} value {level:?}"))
}

fn init_production(filter: EnvFilter, log_dir: &Path) -> anyhow::Result<LogGuard> {
    let (file_writer, file_guard) = rolling_file_writer(log_dir)?;
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(stdout_writer)
                .with_ansi(false),
        )
        .try_init()?;

    Ok(LogGuard {
        _writers: vec![file_guard, stdout_guard],
    })
}

/// Daily rolling `proximity.<date>.log` files in `log_dir`, written off-thread.
fn rolling_file_writer(log_dir: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(log_dir)
        .with_context(|| format!("opening log file in {}", log_dir.display()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Production log directory: [`LOG_DIR_ENV`], else the platform default.
fn log_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/proximity")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "proximity")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
