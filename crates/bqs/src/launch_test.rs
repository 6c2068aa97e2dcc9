//! Tests for scheduler launch

use std::io::Write;
use std::str::FromStr;

use bqs_client::BqsClient;
use bqs_protocol::{BindQueueItem, KeyType, QueryItem};

use super::*;
use crate::cli::Cli;

fn params(config: &Config) -> InitQsParams {
    InitQsParams::resolve(&Cli::default(), config, false).unwrap()
}

// =============================================================================
// Config loading
// =============================================================================

#[test]
fn test_load_config_explicit_missing() {
    let err = load_config(Some(Path::new("/nonexistent/bqs.toml"))).unwrap_err();
    assert!(err.to_string().contains("config file not found"));
}

#[test]
fn test_load_config_explicit() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\ndevice_id = 9").unwrap();

    let (config, used) = load_config(Some(file.path())).unwrap();
    assert_eq!(config.scheduler.device_id, 9);
    assert_eq!(used.as_deref(), Some(file.path()));
}

#[test]
fn test_load_config_invalid() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nmax_connections = 0").unwrap();
    assert!(load_config(Some(file.path())).is_err());
}

// =============================================================================
// init_queue_scheduler
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_init_serves_clients() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("bqs.sock");
    let toml = format!("[server]\nsocket_path = \"{}\"", socket.display());
    let config = Config::from_str(&toml).unwrap();

    let scheduler = init_queue_scheduler(&params(&config)).await.unwrap();
    assert!(scheduler.router().is_ready());

    let mut client = BqsClient::connect(&socket).await.unwrap();
    let batch = client.bind_queue(&[BindQueueItem::new(5, 6)]).await.unwrap();
    assert!(batch.all_ok());
    let found = client
        .get_bind_queue(QueryItem::new(KeyType::Src, BindQueueItem::new(5, 0)))
        .await
        .unwrap();
    assert_eq!(found, vec![BindQueueItem::new(5, 6)]);

    scheduler.shutdown().await;
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_init_without_listener() {
    let config = Config::from_str("[server]\nenabled = false").unwrap();
    let mut params = params(&config);
    params.need_hccl = true;

    let scheduler = init_queue_scheduler(&params).await.unwrap();
    assert!(scheduler.calls_hccl());
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_init_failure_status() {
    let config = Config::from_str("[server]\nenabled = false").unwrap();
    let mut params = params(&config);
    // Second domain without its devices
    params.res_ids = vec![0, 1];
    params.dev_ids.clear();

    let status = init_queue_scheduler(&params).await.unwrap_err();
    assert_eq!(status, BqsStatus::InnerError);
}
