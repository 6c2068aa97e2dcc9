//! BQS - Buffer queue scheduler
//!
//! # Usage
//!
//! ```bash
//! bqs --deviceId 0 --deployMode 1
//! bqs --config configs/bqs.toml --log-level debug
//! bqs --deviceId 0 --resIds 0,1 --devIds 0,1
//! ```
//!
//! Exits with -1 when flags, config or initialization fail.

mod cli;
mod launch;
mod logging;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::{error, info};

use crate::cli::{Cli, InitQsParams, NEED_HCCL_ENV};
use crate::logging::LOG_LEVEL_ENV;

const EXIT_FAILURE: i32 = -1;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_FAILURE);
        }
    };

    let (config, config_path) = match launch::load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("bqs: {e:#}");
            std::process::exit(EXIT_FAILURE);
        }
    };

    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    let level = logging::resolve_log_level(cli.log_level.as_deref(), env_level.as_deref(), &config.log);
    if let Err(e) = logging::init_logging(&level, &config.log) {
        eprintln!("bqs: {e:#}");
        std::process::exit(EXIT_FAILURE);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        config = %config_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(default)".into()),
        "bqs starting"
    );

    let need_hccl = cli::need_hccl(std::env::var(NEED_HCCL_ENV).ok().as_deref());
    let result = match InitQsParams::resolve(&cli, &config, need_hccl) {
        Ok(params) => launch::run(params).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!(error = %format!("{e:#}"), "bqs exiting");
        std::process::exit(EXIT_FAILURE);
    }
}
