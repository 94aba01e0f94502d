//! Logging setup
//!
//! stdout may carry bus traffic (stdio transport), so console output goes
//! to stderr.

use crate::config::LoggingConfig;
use crate::error::{HissrvError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. The returned guard must be
/// held until exit when file logging is enabled.
pub fn init_logging(config: &LoggingConfig, service_name: &str) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| HissrvError::config(format!("invalid log level '{}': {e}", config.level)))?;

    let console_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .boxed()
    };

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                Path::new(dir),
                format!("{service_name}.log"),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| HissrvError::config(format!("logging already initialized: {e}")))?;

    Ok(guard)
}
