//! BQS Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! An empty file is a valid configuration; only specify what you need to
//! change. Command-line flags of the executable override these values.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use bqs_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[scheduler]\ndevice_id = 1").unwrap();
//! assert_eq!(config.scheduler.device_id, 1);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [scheduler]
//! device_id = 0
//! deploy_mode = "multi_process"
//! worker_timeout = "5s"
//!
//! [server]
//! socket_path = "/tmp/bqs.sock"
//!
//! [client]
//! list_page_size = 450
//!
//! [log]
//! level = "info"
//! ```

mod error;
mod logging;
mod scheduler;
mod server;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput, SCHEDULER_TARGETS};
pub use scheduler::{DeployModeConfig, SchedulerConfig};
pub use server::{ClientConfig, DEFAULT_SOCKET_PATH, ServerConfig};
pub use validation::MAX_RES_IDS;

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process and graph settings
    pub scheduler: SchedulerConfig,

    /// Unix-socket front end
    pub server: ServerConfig,

    /// Client paging and connect retry
    pub client: ClientConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML, or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Socket the client should dial
    pub fn client_socket_path(&self) -> &str {
        if self.client.socket_path.is_empty() {
            &self.server.socket_path
        } else {
            &self.client.socket_path
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
