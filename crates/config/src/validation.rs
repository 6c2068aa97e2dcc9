//! Configuration validation
//!
//! Rejects settings the scheduler cannot start with:
//! - more resource domains than the graph holds, or a secondary domain
//!   without device ids
//! - zero worker timeout, pipeline depth, page size or connection limit
//! - empty socket or log file paths
//! - per-target log levels for crates outside the scheduler

use crate::Config;
use crate::error::{ConfigError, Result};
use crate::logging::{LogOutput, SCHEDULER_TARGETS};

/// Resource domains the routing graph keeps
pub const MAX_RES_IDS: usize = 2;

/// Smallest useful read buffer: one frame head
const MIN_READ_BUFFER: usize = 4;

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_scheduler(config)?;
    validate_server(config)?;
    validate_client(config)?;
    validate_log(config)?;
    Ok(())
}

fn validate_scheduler(config: &Config) -> Result<()> {
    let scheduler = &config.scheduler;

    if scheduler.res_ids.is_empty() {
        return Err(ConfigError::missing_field("scheduler", "res_ids"));
    }
    if scheduler.res_ids.len() > MAX_RES_IDS {
        return Err(ConfigError::TooManyResIds {
            count: scheduler.res_ids.len(),
            max: MAX_RES_IDS,
        });
    }
    if scheduler.numa() && scheduler.dev_ids.is_empty() {
        return Err(ConfigError::NumaWithoutDevIds {
            res_ids: scheduler.res_ids.clone(),
        });
    }

    if scheduler.worker_timeout.is_zero() {
        return Err(ConfigError::invalid_value(
            "scheduler",
            "worker_timeout",
            "must be greater than zero",
        ));
    }
    if scheduler.pipeline_depth == 0 {
        return Err(ConfigError::invalid_value(
            "scheduler",
            "pipeline_depth",
            "must be a positive integer",
        ));
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<()> {
    let server = &config.server;
    if !server.enabled {
        return Ok(());
    }

    if server.socket_path.is_empty() {
        return Err(ConfigError::missing_field("server", "socket_path"));
    }
    if server.max_connections == 0 {
        return Err(ConfigError::invalid_value(
            "server",
            "max_connections",
            "must be a positive integer",
        ));
    }
    if server.read_buffer_size < MIN_READ_BUFFER {
        return Err(ConfigError::invalid_value(
            "server",
            "read_buffer_size",
            format!("must be at least {MIN_READ_BUFFER} bytes"),
        ));
    }

    Ok(())
}

fn validate_client(config: &Config) -> Result<()> {
    let client = &config.client;

    if client.bind_page_size == 0 {
        return Err(ConfigError::invalid_value(
            "client",
            "bind_page_size",
            "must be a positive integer",
        ));
    }
    if client.list_page_size == 0 {
        return Err(ConfigError::invalid_value(
            "client",
            "list_page_size",
            "must be a positive integer",
        ));
    }
    if client.not_started_retries == 0
        || client.would_block_retries == 0
        || client.timeout_retries == 0
    {
        return Err(ConfigError::invalid_value(
            "client",
            "retries",
            "every retry budget allows at least one attempt",
        ));
    }

    Ok(())
}

fn validate_log(config: &Config) -> Result<()> {
    if let LogOutput::File(ref path) = config.log.output
        && path.trim().is_empty()
    {
        return Err(ConfigError::missing_field("log", "output"));
    }
    if let Some(target) = config
        .log
        .targets
        .keys()
        .find(|target| !SCHEDULER_TARGETS.contains(&target.as_str()))
    {
        return Err(ConfigError::UnknownLogTarget(target.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn parse(toml: &str) -> Result<Config> {
        Config::from_str(toml)
    }

    #[test]
    fn test_empty_config_is_valid() {
        assert!(parse("").is_ok());
    }

    #[test]
    fn test_too_many_res_ids() {
        let err = parse("[scheduler]\nres_ids = [0, 1, 2]\ndev_ids = [0]").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooManyResIds {
                count: 3,
                max: MAX_RES_IDS
            }
        ));
    }

    #[test]
    fn test_empty_res_ids() {
        let err = parse("[scheduler]\nres_ids = []").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                field: "res_ids",
                ..
            }
        ));
    }

    #[test]
    fn test_numa_needs_dev_ids() {
        let err = parse("[scheduler]\nres_ids = [0, 1]").unwrap_err();
        assert!(matches!(err, ConfigError::NumaWithoutDevIds { ref res_ids } if res_ids == &[0, 1]));
        assert!(parse("[scheduler]\nres_ids = [0, 1]\ndev_ids = [0, 1]").is_ok());
    }

    #[test]
    fn test_zero_worker_timeout() {
        let err = parse("[scheduler]\nworker_timeout = \"0s\"").unwrap_err();
        assert!(err.to_string().contains("worker_timeout"));
    }

    #[test]
    fn test_zero_pipeline_depth() {
        assert!(parse("[scheduler]\npipeline_depth = 0").is_err());
    }

    #[test]
    fn test_server_checks_skipped_when_disabled() {
        let toml = "[server]\nenabled = false\nsocket_path = \"\"";
        assert!(parse(toml).is_ok());

        let toml = "[server]\nsocket_path = \"\"";
        let err = parse(toml).unwrap_err();
        assert!(err.to_string().contains("socket_path"));
    }

    #[test]
    fn test_server_limits() {
        assert!(parse("[server]\nmax_connections = 0").is_err());
        assert!(parse("[server]\nread_buffer_size = 2").is_err());
    }

    #[test]
    fn test_client_page_sizes() {
        assert!(parse("[client]\nbind_page_size = 0").is_err());
        assert!(parse("[client]\nlist_page_size = 0").is_err());
        assert!(parse("[client]\ntimeout_retries = 0").is_err());
    }

    #[test]
    fn test_empty_log_file() {
        let err = parse("[log]\noutput = \" \"").unwrap_err();
        assert!(err.to_string().contains("output"));
    }

    #[test]
    fn test_log_targets() {
        assert!(parse("[log.targets]\nbqs_routing = \"debug\"").is_ok());
        let err = parse("[log.targets]\nhyper = \"debug\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLogTarget(ref t) if t == "hyper"));
    }
}
