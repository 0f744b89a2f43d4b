//! # Observability
//!
//! Logging setup shared by Herald binaries.
//!
//! Binaries call [`init_with_config`] once at startup and then use the
//! ordinary `tracing` macros. Library code never installs a subscriber.
//!
//! Two sinks are available:
//!
//! - a JSONL file (`log_path`), one object per event, flushed per line, so
//!   `tail -f ~/.herald/logs/herald.jsonl | jq` works while the process runs
//! - a compact human-readable stream on stderr (`also_stderr`)
//!
//! `RUST_LOG` takes precedence over `default_level` for both.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "herald".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

mod file_writer;
mod json_layer;

pub use file_writer::JsonlFileWriter;
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL line.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info").
    /// Overridden by `RUST_LOG`.
    pub default_level: String,

    /// JSONL log file. No file sink when `None`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr. Always on when there is no file sink.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Why logging could not be installed.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to open log file {}: {source}", .path.display())]
    LogFile { path: PathBuf, source: io::Error },

    #[error("subscriber already set: {0}")]
    AlreadyInitialized(String),
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber described by `config`.
pub fn try_init(config: &LogConfig) -> Result<(), InitError> {
    let json_layer = match &config.log_path {
        Some(path) => {
            let writer = JsonlFileWriter::open(path).map_err(|source| InitError::LogFile {
                path: path.clone(),
                source,
            })?;
            Some(
                JsonLayer::new(config.service_name.clone(), writer)
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = if config.also_stderr || json_layer.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .with_writer(io::stderr)
                .with_filter(env_filter(&config.default_level)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| InitError::AlreadyInitialized(e.to_string()))?;

    if let Some(path) = &config.log_path {
        tracing::debug!(log_path = %path.display(), "observability initialized");
    }
    Ok(())
}

/// Install logging, degrading to stderr-only if the log file is unusable.
pub fn init_with_config(config: LogConfig) {
    match try_init(&config) {
        Ok(()) => {}
        Err(InitError::LogFile { path, source }) => {
            let fallback = LogConfig {
                log_path: None,
                also_stderr: true,
                ..config
            };
            if try_init(&fallback).is_ok() {
                tracing::warn!(
                    log_path = %path.display(),
                    error = %source,
                    "Could not open log file, logging to stderr only"
                );
            }
        }
        Err(InitError::AlreadyInitialized(_)) => {}
    }
}
