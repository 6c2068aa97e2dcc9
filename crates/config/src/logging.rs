//! Logging configuration
//!
//! One global level for the scheduler, optionally refined per crate under
//! `[log.targets]`. The executable folds both into a tracing filter.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ConfigError;

/// Crates the scheduler logs from, usable as `[log.targets]` keys
pub const SCHEDULER_TARGETS: [&str; 7] = [
    "bqs",
    "bqs_server",
    "bqs_routing",
    "bqs_operator",
    "bqs_protocol",
    "bqs_client",
    "bqs_config",
];

/// Log level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Convert to tracing level filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }

    /// Map a numeric platform log level (0 debug .. 4 off)
    ///
    /// Returns `None` for anything that is not one of those numbers.
    pub fn from_platform_level(value: &str) -> Option<Self> {
        match value.trim().parse::<u8>().ok()? {
            0 => Some(Self::Debug),
            1 => Some(Self::Info),
            2 => Some(Self::Warn),
            3 => Some(Self::Error),
            4 => Some(Self::Off),
            _ => None,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" => Ok(Self::Off),
            other => Err(ConfigError::UnknownLogLevel(other.to_string())),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console output (default)
    #[default]
    Console,
    /// JSON structured logging
    Json,
}

/// Log output destination
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Write to stdout (default)
    #[default]
    Stdout,
    /// Write to stderr
    Stderr,
    /// Write to a file
    #[serde(untagged)]
    File(String),
}

/// Logging configuration
///
/// # Example
///
/// ```toml
/// [log]
/// level = "info"
/// format = "json"
/// output = "/var/log/bqs.log"
///
/// [log.targets]
/// bqs_routing = "debug"
/// bqs_client = "warn"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error, off)
    /// Default: info
    pub level: LogLevel,

    /// Output format (console, json)
    /// Default: console
    pub format: LogFormat,

    /// Output destination (stdout, stderr, or file path)
    /// Default: stdout
    pub output: LogOutput,

    /// Per-crate levels overriding `level`
    pub targets: BTreeMap<String, LogLevel>,
}

impl LogConfig {
    /// Filter directives: `base` first, then one `target=level` per override
    pub fn directives(&self, base: &str) -> String {
        self.targets
            .iter()
            .fold(base.to_string(), |mut acc, (target, level)| {
                acc.push(',');
                acc.push_str(target);
                acc.push('=');
                acc.push_str(level.as_str());
                acc
            })
    }
}
