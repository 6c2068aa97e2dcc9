//! Client to scheduler over a real Unix socket

use std::collections::HashSet;
use std::sync::Arc;

use bqs_client::{BqsClient, ClientConfig};
use bqs_operator::LocalCommService;
use bqs_protocol::{BindQueueItem, KeyType, QueryItem};
use bqs_routing::LocalQueueService;
use bqs_server::{BqsListenerConfig, Scheduler, SchedulerParams};

struct Running {
    scheduler: Scheduler,
    client: BqsClient,
    _dir: tempfile::TempDir,
}

async fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("bqs.sock");
    let params = SchedulerParams {
        listener: Some(BqsListenerConfig::default().with_socket_path(&socket)),
        ..SchedulerParams::default()
    };
    let scheduler = Scheduler::start(
        params,
        Arc::new(LocalQueueService::new()),
        Arc::new(LocalCommService::new()),
    )
    .await
    .unwrap();

    let client = BqsClient::connect_with(ClientConfig::default().with_socket_path(&socket))
        .await
        .unwrap();
    Running {
        scheduler,
        client,
        _dir: dir,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bind_500_then_list_all() {
    let mut running = start().await;
    let items: Vec<BindQueueItem> = (0..500).map(|i| BindQueueItem::new(i, i + 1)).collect();

    let batch = running.client.bind_queue(&items).await.unwrap();
    assert_eq!(batch.succeeded, 500);
    assert!(batch.all_ok());

    let all = running.client.get_all_bind_queue().await.unwrap();
    assert_eq!(all.len(), 500);
    let distinct: HashSet<_> = all.iter().copied().collect();
    assert_eq!(distinct.len(), 500);
    assert_eq!(distinct, items.iter().copied().collect());

    let snapshot = running.scheduler.metrics().snapshot();
    assert_eq!(snapshot.bind_requests, 2);
    assert_eq!(snapshot.get_all_bind_requests, 2);

    let ctx = running.scheduler.shutdown().await.unwrap();
    assert_eq!(ctx.relation.count_binds(0), 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bind_then_get_bind_by_src() {
    let mut running = start().await;

    let batch = running
        .client
        .bind_queue(&[BindQueueItem::new(5, 6)])
        .await
        .unwrap();
    assert_eq!(batch.results, vec![0]);

    let found = running
        .client
        .get_bind_queue(QueryItem::new(KeyType::Src, BindQueueItem::new(5, 0)))
        .await
        .unwrap();
    assert_eq!(found, vec![BindQueueItem::new(5, 6)]);

    let none = running
        .client
        .get_bind_queue(QueryItem::new(KeyType::Src, BindQueueItem::new(15, 0)))
        .await
        .unwrap();
    assert!(none.is_empty());

    running.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unbind_then_rebind_elsewhere() {
    let mut running = start().await;
    running
        .client
        .bind_queue(&[BindQueueItem::new(1, 2)])
        .await
        .unwrap();

    // One source per destination
    let conflict = running
        .client
        .bind_queue(&[BindQueueItem::new(3, 2)])
        .await
        .unwrap();
    assert_eq!(conflict.succeeded, 0);

    let unbound = running
        .client
        .unbind_queue(&[QueryItem::new(KeyType::Dst, BindQueueItem::new(0, 2))])
        .await
        .unwrap();
    assert!(unbound.all_ok());

    let rebound = running
        .client
        .bind_queue(&[BindQueueItem::new(3, 2)])
        .await
        .unwrap();
    assert!(rebound.all_ok());

    let by_dst = running
        .client
        .get_bind_queue(QueryItem::new(KeyType::Dst, BindQueueItem::new(0, 2)))
        .await
        .unwrap();
    assert_eq!(by_dst, vec![BindQueueItem::new(3, 2)]);

    running.scheduler.shutdown().await;
}
