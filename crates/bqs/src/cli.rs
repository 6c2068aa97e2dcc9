//! Launch flags and their merge with the config file

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;

use bqs_config::{Config, MAX_RES_IDS};
use bqs_server::{BqsListenerConfig, DeployMode, RouterConfig, SchedulerParams};

/// Environment switch routing buffer events through the collective comm path
pub const NEED_HCCL_ENV: &str = "DGW_NEED_HCCL";

/// BQS - Buffer queue scheduler
#[derive(Parser, Debug, Default)]
#[command(name = "bqs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (error if specified but not found)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off). Overrides config file.
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Device the scheduler serves
    #[arg(long = "deviceId")]
    pub device_id: Option<u32>,

    /// Host process that started the scheduler
    #[arg(long)]
    pub pid: Option<i32>,

    #[arg(long = "pidSign")]
    pub pid_sign: Option<String>,

    /// Forced reschedule interval in milliseconds
    #[arg(long = "reschedInterval")]
    pub resched_interval: Option<u64>,

    /// 0 single process, 1 multi process, 2 multi thread
    #[arg(long = "deployMode")]
    pub deploy_mode: Option<u32>,

    #[arg(long = "vfId")]
    pub vf_id: Option<u32>,

    /// Event group joined at startup
    #[arg(long = "qsInitGroupName")]
    pub init_group_name: Option<String>,

    #[arg(long = "schedPolicy")]
    pub sched_policy: Option<u64>,

    #[arg(long)]
    pub starter: Option<u32>,

    /// Abnormal queue sweep interval in milliseconds
    #[arg(long = "abnormalInterval")]
    pub abnormal_interval: Option<u64>,

    /// Resource domains, comma separated; two entries enable the second domain
    #[arg(long = "resIds", value_delimiter = ',')]
    pub res_ids: Vec<u32>,

    /// Devices per resource domain, comma separated
    #[arg(long = "devIds", value_delimiter = ',')]
    pub dev_ids: Vec<u32>,

    #[arg(long = "profFlag")]
    pub prof_flag: Option<u32>,

    #[arg(long = "profCfgData")]
    pub prof_cfg_data: Option<String>,
}

/// Fully resolved launch parameters
#[derive(Debug, Clone)]
pub struct InitQsParams {
    pub device_id: u32,
    pub pid: i32,
    pub pid_sign: String,
    pub resched_interval: Duration,
    pub deploy_mode: DeployMode,
    pub vf_id: u32,
    pub init_group_name: String,
    pub sched_policy: u64,
    pub starter: u32,
    pub abnormal_interval: Duration,
    pub res_ids: Vec<u32>,
    pub dev_ids: Vec<u32>,
    pub prof_flag: bool,
    pub prof_cfg_data: String,
    pub need_hccl: bool,
    pub worker_timeout: Duration,
    pub pipeline_depth: u32,
    pub listener: Option<BqsListenerConfig>,
}

impl InitQsParams {
    /// Merge flags over the config file; flags win
    pub fn resolve(cli: &Cli, config: &Config, need_hccl: bool) -> Result<Self> {
        let scheduler = &config.scheduler;

        let mode_code = cli.deploy_mode.unwrap_or_else(|| scheduler.deploy_mode.code());
        let Some(deploy_mode) = DeployMode::from_code(mode_code) else {
            bail!("invalid deploy mode {mode_code}");
        };

        let res_ids = if cli.res_ids.is_empty() {
            scheduler.res_ids.clone()
        } else {
            cli.res_ids.clone()
        };
        let dev_ids = if cli.dev_ids.is_empty() {
            scheduler.dev_ids.clone()
        } else {
            cli.dev_ids.clone()
        };
        if res_ids.len() > MAX_RES_IDS {
            bail!("at most {MAX_RES_IDS} resource ids are supported, got {}", res_ids.len());
        }
        if res_ids.len() > 1 && dev_ids.is_empty() {
            bail!("--devIds is required when two resource ids are given");
        }

        let listener = config.server.enabled.then(|| BqsListenerConfig {
            socket_path: PathBuf::from(&config.server.socket_path),
            max_connections: config.server.max_connections,
            read_buffer_size: config.server.read_buffer_size,
        });

        Ok(Self {
            device_id: cli.device_id.unwrap_or(scheduler.device_id),
            pid: cli.pid.unwrap_or_default(),
            pid_sign: cli.pid_sign.clone().unwrap_or_default(),
            resched_interval: cli
                .resched_interval
                .map(Duration::from_millis)
                .unwrap_or(scheduler.resched_interval),
            deploy_mode,
            vf_id: cli.vf_id.unwrap_or_default(),
            init_group_name: cli
                .init_group_name
                .clone()
                .unwrap_or_else(|| scheduler.init_group_name.clone()),
            sched_policy: cli.sched_policy.unwrap_or(scheduler.sched_policy),
            starter: cli.starter.unwrap_or_default(),
            abnormal_interval: cli
                .abnormal_interval
                .map(Duration::from_millis)
                .unwrap_or(scheduler.abnormal_interval),
            res_ids,
            dev_ids,
            prof_flag: cli.prof_flag.is_some_and(|flag| flag != 0),
            prof_cfg_data: cli.prof_cfg_data.clone().unwrap_or_default(),
            need_hccl,
            worker_timeout: scheduler.worker_timeout,
            pipeline_depth: scheduler.pipeline_depth,
            listener,
        })
    }

    #[inline]
    pub fn numa(&self) -> bool {
        self.res_ids.len() > 1
    }

    /// Parameters for `Scheduler::start`
    pub fn scheduler_params(&self) -> SchedulerParams {
        SchedulerParams {
            router: RouterConfig {
                device_id: self.device_id,
                deploy_mode: self.deploy_mode,
                numa: self.numa(),
                dev_ids: self.dev_ids.clone(),
                pipeline_depth: self.pipeline_depth,
                ..RouterConfig::default()
            },
            listener: self.listener.clone(),
            worker_timeout: self.worker_timeout,
            need_hccl: self.need_hccl,
            ..SchedulerParams::default()
        }
    }
}

/// `DGW_NEED_HCCL=1` turns the collective comm path on
pub fn need_hccl(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim() == "1")
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
