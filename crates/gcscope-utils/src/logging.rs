//! # Logging Utilities
//!
//! Logging setup for applications embedding gcscope, built on `tracing`.
//!
//! The engine crates only emit `tracing` events; they never install a
//! subscriber. Binaries and test suites call one of the `init_*` functions
//! here once at startup.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gcscope_utils::init_logging;
//!
//! // Keep the guard alive for as long as file output should be flushed
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("Analysis started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Filter directives (e.g. `RUST_LOG=gcscope_core=debug`)
//! - `GCSCOPE_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `GCSCOPE_LOG_FILE`: Optional log file, rolled daily, in addition to stderr
//!
//! Heap walks log every constructed type at `debug` and every cache miss at
//! `trace`; over a large heap that is a lot of output, so prefer module
//! specific directives over a global `debug`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "GCSCOPE_LOG_FORMAT";

/// Environment variable naming an additional log file.
pub const LOG_FILE_ENV: &str = "GCSCOPE_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    /// Most verbose; includes per-object cache misses
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Initialize logging from the environment
///
/// Logs go to stderr, and additionally to `GCSCOPE_LOG_FILE` when set. The
/// returned guard flushes the file writer on drop; it is `None` when no file
/// is configured.
///
/// ## Errors
///
/// Returns an error if `GCSCOPE_LOG_FORMAT` is invalid or a global
/// subscriber is already installed.
pub fn init_logging() -> Result<Option<WorkerGuard>, LoggingError>
{
    let format = match env::var(LOG_FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::default(),
    };
    let file = env::var(LOG_FILE_ENV).ok().map(PathBuf::from);
    install(format, None, true, file.as_deref())
}

/// Initialize stderr logging with an explicit level and format.
///
/// `RUST_LOG` is ignored.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<(), LoggingError>
{
    install(format, Some(level.into()), true, None).map(|_| ())
}

/// Initialize file-only logging, for hosts that own stdout and stderr.
///
/// `path` may be a directory, in which case a dated file
/// (`YYYY-MM-DD-gcscope.log`) is created inside it. Returns the file that is
/// written and the guard that flushes it.
///
/// ## Errors
///
/// Returns an error if the directory cannot be created or a global subscriber
/// is already installed.
pub fn init_logging_to_file(path: &Path, level: Option<LogLevel>) -> Result<(PathBuf, WorkerGuard), LoggingError>
{
    let file = if path.is_dir() {
        dated_log_file(path)
    } else {
        path.to_path_buf()
    };
    if let Some(parent) = file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let guard = install(LogFormat::Pretty, level.map(Into::into), false, Some(&file))?
        .ok_or_else(|| LoggingError::InitializationFailed("file writer was not created".to_string()))?;
    Ok((file, guard))
}

/// Install a subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
/// Verbosity follows `RUST_LOG` and defaults to `warn`.
pub fn init_test_logging()
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(None, Level::WARN))
        .with_test_writer()
        .with_target(true)
        .try_init();
}

/// Dated log file name inside `dir`.
pub fn dated_log_file(dir: &Path) -> PathBuf
{
    dir.join(format!("{}-gcscope.log", Utc::now().format("%Y-%m-%d")))
}

fn filter(explicit: Option<Level>, default: Level) -> EnvFilter
{
    match explicit {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default.to_string())),
    }
}

fn layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    match format {
        LogFormat::Pretty => base.with_ansi(ansi).with_filter(filter).boxed(),
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn install(
    format: LogFormat,
    level: Option<Level>,
    console: bool,
    file: Option<&Path>,
) -> Result<Option<WorkerGuard>, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if console {
        layers.push(layer(format, io::stderr, true, filter(level, Level::INFO)));
    }

    let guard = match file {
        Some(path) => {
            let directory = path.parent().filter(|parent| !parent.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| LoggingError::InitializationFailed(format!("{} is not a file path", path.display())))?;
            let appender = if console {
                tracing_appender::rolling::daily(directory, name)
            } else {
                tracing_appender::rolling::never(directory, name)
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(layer(format, writer, false, filter(level, Level::INFO)));
            Some(guard)
        }
        None => None,
    };

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// A subscriber could not be installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
