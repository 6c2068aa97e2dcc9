//! Scheduler process settings
//!
//! Mirrors the executable's launch flags; any flag given on the command line
//! overrides the value here.

use std::time::Duration;

use serde::Deserialize;

/// How the scheduler runs relative to its clients
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployModeConfig {
    SingleProcess,
    #[default]
    MultiProcess,
    MultiThread,
}

impl DeployModeConfig {
    /// Numeric form used by the `--deployMode` flag
    pub fn code(&self) -> u32 {
        match self {
            Self::SingleProcess => 0,
            Self::MultiProcess => 1,
            Self::MultiThread => 2,
        }
    }
}

/// `[scheduler]` section
///
/// # Example
///
/// ```toml
/// [scheduler]
/// device_id = 0
/// deploy_mode = "multi_process"
/// resched_interval = "10ms"
/// res_ids = [0, 1]
/// dev_ids = [0, 1]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Device the scheduler serves
    /// Default: 0
    pub device_id: u32,

    /// Default: multi_process
    pub deploy_mode: DeployModeConfig,

    /// Interval between forced reschedules
    /// Default: 0s (event driven only)
    #[serde(with = "humantime_serde")]
    pub resched_interval: Duration,

    /// Interval between abnormal queue sweeps
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub abnormal_interval: Duration,

    /// Scheduling policy flags, passed through to collaborators
    pub sched_policy: u64,

    /// Event group the scheduler joins at startup
    pub init_group_name: String,

    /// Resource domains; two entries enable the secondary domain
    /// Default: [0]
    pub res_ids: Vec<u32>,

    /// Devices per resource domain
    pub dev_ids: Vec<u32>,

    /// Bound on one graph worker round trip
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub worker_timeout: Duration,

    /// Depth of each client's pipeline queue
    /// Default: 2
    pub pipeline_depth: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            deploy_mode: DeployModeConfig::default(),
            resched_interval: Duration::ZERO,
            abnormal_interval: Duration::from_secs(1),
            sched_policy: 0,
            init_group_name: String::new(),
            res_ids: vec![0],
            dev_ids: Vec::new(),
            worker_timeout: Duration::from_secs(5),
            pipeline_depth: 2,
        }
    }
}

impl SchedulerConfig {
    /// Whether the secondary resource domain is active
    pub fn numa(&self) -> bool {
        self.res_ids.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.device_id, 0);
        assert_eq!(config.deploy_mode, DeployModeConfig::MultiProcess);
        assert_eq!(config.worker_timeout, Duration::from_secs(5));
        assert!(!config.numa());
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
device_id = 3
deploy_mode = "multi_thread"
worker_timeout = "250ms"
res_ids = [0, 1]
dev_ids = [2, 3]
"#;
        let config: SchedulerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.device_id, 3);
        assert_eq!(config.deploy_mode.code(), 2);
        assert_eq!(config.worker_timeout, Duration::from_millis(250));
        assert!(config.numa());
        assert_eq!(config.dev_ids, vec![2, 3]);
        // Defaults still apply
        assert_eq!(config.pipeline_depth, 2);
        assert_eq!(config.abnormal_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_deserialize_unknown_mode() {
        let result: Result<SchedulerConfig, _> = toml::from_str("deploy_mode = \"cluster\"");
        assert!(result.is_err());
    }
}
