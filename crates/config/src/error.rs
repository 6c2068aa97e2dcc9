//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or validating a scheduler configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("[{section}] is missing required field '{field}'")]
    MissingField {
        section: &'static str,
        field: &'static str,
    },

    #[error("[{section}] has invalid {field}: {message}")]
    InvalidValue {
        section: &'static str,
        field: &'static str,
        message: String,
    },

    /// More resource domains than the routing graph keeps
    #[error("[scheduler] res_ids lists {count} resource domains, at most {max} supported")]
    TooManyResIds { count: usize, max: usize },

    /// A secondary resource domain with no device ids to route it to
    #[error("[scheduler] res_ids {res_ids:?} enable numa routing but dev_ids is empty")]
    NumaWithoutDevIds { res_ids: Vec<u32> },

    /// `[log.targets]` names a crate the scheduler does not log from
    #[error("[log.targets] has unknown target '{0}'")]
    UnknownLogTarget(String),

    /// Level name outside trace/debug/info/warn/error/off
    #[error("unknown log level '{0}'")]
    UnknownLogLevel(String),
}

impl ConfigError {
    pub fn missing_field(section: &'static str, field: &'static str) -> Self {
        Self::MissingField { section, field }
    }

    pub fn invalid_value(
        section: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section,
            field,
            message: message.into(),
        }
    }
}
