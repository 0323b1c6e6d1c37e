//! Tracing subscriber setup for the binary.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::{ConfigError, Result};

const LOG_FILE_PREFIX: &str = "pluginsd.log";

/// Keeps the file writer flushing until dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Directive for this crate, `--debug` wins over the configured level.
pub fn crate_directive(level: &str, debug: bool) -> Result<Directive> {
    let level = if debug { "debug" } else { level };
    format!("pluginsd={level}")
        .parse()
        .map_err(|e| ConfigError::Validation(format!("Invalid log level '{level}': {e}")).into())
}

/// Install the global subscriber: stderr in text or JSON, plus a daily rolling
/// file when a log directory is configured. `RUST_LOG` still applies on top.
pub fn init(settings: &LoggingSettings, debug: bool) -> Result<LogGuard> {
    let filter = EnvFilter::from_default_env().add_directive(crate_directive(&settings.level, debug)?);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match settings.format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    });

    let file_guard = match &settings.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(match settings.format {
                LogFormat::Text => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
                LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
            });
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ConfigError::Validation(format!("Cannot install logger: {e}")))?;

    Ok(LogGuard { _file: file_guard })
}
