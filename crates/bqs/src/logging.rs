//! Logging bootstrap

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use bqs_config::{LogConfig, LogFormat, LogLevel, LogOutput};

/// Numeric platform log level (0 debug .. 4 off)
pub const LOG_LEVEL_ENV: &str = "ASCEND_GLOBAL_LOG_LEVEL";

/// Resolve log level: CLI flag > environment > config file
pub fn resolve_log_level(cli_level: Option<&str>, env_level: Option<&str>, config: &LogConfig) -> String {
    if let Some(level) = cli_level {
        return level.to_string();
    }

    if let Some(level) = env_level.and_then(LogLevel::from_platform_level) {
        return level.as_str().to_string();
    }

    config.level.as_str().to_string()
}

/// Initialize the tracing subscriber for logging
///
/// `[log.targets]` overrides are appended to `level`.
pub fn init_logging(level: &str, config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.directives(level))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let writer = match &config.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };

    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(writer);

    match config.format {
        LogFormat::Console => tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(layer.json())
            .with(filter)
            .init(),
    }

    Ok(())
}
