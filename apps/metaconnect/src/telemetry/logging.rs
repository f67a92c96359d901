use std::io;
use std::path::PathBuf;

use clap::ValueEnum;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("unable to open log file: {0}")]
    File(#[from] io::Error),
    #[error("logging already initialized: {0}")]
    Init(String),
}

// The non-blocking writer stops flushing once its guard drops, so the guard
// lives for the whole process.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the global subscriber. An explicit `RUST_LOG` wins over the CLI
/// level, matching the usual env-filter behaviour.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = FILE_GUARD.set(guard);
            builder
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|err| LogError::Init(err.to_string()))
        }
        None => builder
            .with_writer(io::stderr)
            .try_init()
            .map_err(|err| LogError::Init(err.to_string())),
    }
}
