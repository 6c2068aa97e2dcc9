//! Scheduler launch and shutdown

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use bqs_config::Config;
use bqs_operator::LocalCommService;
use bqs_protocol::BqsStatus;
use bqs_routing::LocalQueueService;
use bqs_server::Scheduler;

use crate::cli::InitQsParams;

/// Config files tried when `--config` is absent
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["configs/bqs.toml", "bqs.toml"];

/// Load the config file, or defaults when none is found
///
/// An explicit path must exist.
pub fn load_config(path: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        let config = Config::from_file(path).context("failed to load configuration")?;
        return Ok((config, Some(path.to_path_buf())));
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let candidate = PathBuf::from(candidate);
        if candidate.exists() {
            let config = Config::from_file(&candidate).context("failed to load configuration")?;
            return Ok((config, Some(candidate)));
        }
    }
    Ok((Config::default(), None))
}

/// Build the scheduler context and start the router, worker and listener
pub async fn init_queue_scheduler(params: &InitQsParams) -> std::result::Result<Scheduler, BqsStatus> {
    info!(
        device_id = params.device_id,
        pid = params.pid,
        deploy_mode = %params.deploy_mode,
        resched_interval = ?params.resched_interval,
        abnormal_interval = ?params.abnormal_interval,
        res_ids = ?params.res_ids,
        dev_ids = ?params.dev_ids,
        group = %params.init_group_name,
        sched_policy = params.sched_policy,
        prof_flag = params.prof_flag,
        "init queue scheduler"
    );

    let device = Arc::new(LocalQueueService::new());
    let comm = Arc::new(LocalCommService::new());
    match Scheduler::start(params.scheduler_params(), device, comm).await {
        Ok(scheduler) => Ok(scheduler),
        Err(e) => {
            error!(error = %e, "queue scheduler init failed");
            Err(e.status())
        }
    }
}

/// Run until SIGINT or SIGTERM, then shut down
pub async fn run(params: InitQsParams) -> Result<()> {
    let scheduler = init_queue_scheduler(&params)
        .await
        .map_err(|status| anyhow::anyhow!("init queue scheduler failed: {status}"))?;

    info!(
        calls_hccl = scheduler.calls_hccl(),
        socket = ?params.listener.as_ref().map(|l| l.socket_path.display().to_string()),
        "queue scheduler running"
    );

    let cancel = scheduler.cancel_token();
    tokio::select! {
        _ = wait_for_shutdown() => info!("shutdown signal received, stopping queue scheduler..."),
        _ = cancel.cancelled() => warn!("queue scheduler cancelled"),
    }

    scheduler.shutdown().await;
    info!("queue scheduler shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
#[path = "launch_test.rs"]
mod tests;
