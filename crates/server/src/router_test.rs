//! Tests for the router server

use std::sync::Arc;
use std::time::Duration;

use bqs_operator::{LocalCommService, SchedulerContext};
use bqs_protocol::config::{ConfigBody, ConfigCmd, ConfigInfo, Endpoint, Route, encode_update};
use bqs_protocol::{BindInit, BqsStatus, Bytes, BytesMut, QueueRoute, QueueRouteQuery, RelationEvent};
use bqs_routing::{BindRelation, EntityInfo, LocalQueueService, QueueAuth};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::event::SubEvent;
use crate::worker;

const CLIENT_PID: i32 = 4321;

struct Harness {
    router: Arc<RouterServer>,
    device: Arc<LocalQueueService>,
    sender: EventSender,
    _cancel: tokio_util::sync::DropGuard,
}

fn context(device: Arc<LocalQueueService>, device_id: u32) -> SchedulerContext {
    let relation = BindRelation::new(device);
    SchedulerContext::new(relation, Arc::new(LocalCommService::new())).with_device_id(device_id)
}

fn router(config: RouterConfig) -> (Arc<RouterServer>, Arc<LocalQueueService>, CancellationToken) {
    let device = Arc::new(LocalQueueService::new());
    let cancel = CancellationToken::new();
    let (handle, _join) = worker::spawn(
        context(device.clone(), config.device_id),
        16,
        Duration::from_secs(2),
        Arc::new(ServerMetrics::new()),
        cancel.clone(),
    );
    let router = Arc::new(RouterServer::new(config, device.clone(), handle));
    (router, device, cancel)
}

async fn ready(config: RouterConfig) -> Harness {
    let (router, device, cancel) = router(config);
    let sender = router.init().await.unwrap();
    router.notify_init_success();
    Harness {
        router,
        device,
        sender,
        _cancel: cancel.drop_guard(),
    }
}

fn bind_init_msg(pid: i32) -> Bytes {
    BindInit {
        sync_event_head: 0xabcd,
        pid,
        group_id: 3,
        major_version: 0,
    }
    .encode()
    .freeze()
}

fn query_msg(query: &QueueRouteQuery) -> Bytes {
    let mut buf = BytesMut::new();
    query.put(&mut buf);
    buf.freeze()
}

async fn send(harness: &Harness, event: QsEvent) -> Delivered {
    harness.sender.submit(event).await.unwrap()
}

async fn bind_init(harness: &Harness) -> QsResponse {
    let event = QsEvent::new(SubEvent::AclBindQueueInit.id()).with_msg(bind_init_msg(CLIENT_PID));
    send(harness, event).await.response.unwrap()
}

async fn relation(harness: &Harness, sub: SubEvent, routes: Vec<QueueRoute>) -> (QsResponse, Vec<QueueRoute>) {
    let payload = RelationEvent::routes(sub.id(), routes).encode();
    let event = QsEvent::new(SubEvent::AclBindQueue.id()).with_payload(payload);
    let delivered = send(harness, event).await;
    let routes = RelationEvent::parse(&delivered.payload.unwrap(), false)
        .unwrap()
        .routes;
    (delivered.response.unwrap(), routes)
}

fn src_query(src_id: u32) -> QueueRouteQuery {
    QueueRouteQuery {
        query_type: 0,
        src_id,
        ..QueueRouteQuery::default()
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_not_ready_rejects() {
    let (router, _, _cancel) = router(RouterConfig::default());
    let sender = router.init().await.unwrap();
    assert_eq!(router.status(), ThreadStatus::InitSuccess);

    let delivered = sender
        .submit(QsEvent::new(SubEvent::AclBindQueueInit.id()).with_msg(bind_init_msg(1)))
        .await
        .unwrap();
    let response = delivered.response.unwrap();
    assert_eq!(response.ret_code, BqsStatus::NotInit.code());
    assert_eq!(router.metrics().snapshot().rejected_events, 1);
}

#[tokio::test]
async fn test_init_is_idempotent_and_destroy_resets() {
    let harness = ready(RouterConfig::default()).await;
    let again = harness.router.init().await;
    assert!(again.is_ok());

    bind_init(&harness).await;
    harness.router.destroy().await;

    assert_eq!(harness.router.status(), ThreadStatus::NotInit);
    assert!(!harness.router.is_ready());
    assert_eq!(harness.router.pipeline_queue_id(), None);
    assert!(matches!(
        harness.sender.submit(QsEvent::new(23)).await,
        Err(ServerError::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_init_fails_without_numa_devices() {
    let config = RouterConfig {
        numa: true,
        ..RouterConfig::default()
    };
    let (router, _, _cancel) = router(config);

    let result = router.init().await;
    assert!(matches!(result, Err(ServerError::InitFailed(BqsStatus::InnerError))));
    assert_eq!(router.status(), ThreadStatus::InitFail);
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_unsupported_sub_events() {
    let harness = ready(RouterConfig::default()).await;

    for sub_event_id in [7, 10, 16, 19, 99] {
        let response = send(&harness, QsEvent::new(sub_event_id)).await.response.unwrap();
        assert_eq!(response.ret_code, BqsStatus::ParamInvalid.code(), "sub event {sub_event_id}");
    }
}

#[tokio::test]
async fn test_aicpu_events_ignored_in_thread_mode() {
    let harness = ready(RouterConfig {
        deploy_mode: DeployMode::MultiThread,
        ..RouterConfig::default()
    })
    .await;

    let event = QsEvent::new(SubEvent::AicpuBindQueueInit.id()).with_msg(bind_init_msg(CLIENT_PID));
    let delivered = send(&harness, event).await;
    assert!(delivered.response.is_none());
    assert_eq!(harness.router.pipeline_queue_id(), None);
}

#[tokio::test]
async fn test_aicpu_bind_init_echoes_sync_head() {
    let harness = ready(RouterConfig::default()).await;

    let event = QsEvent::new(SubEvent::AicpuBindQueueInit.id()).with_msg(bind_init_msg(CLIENT_PID));
    let response = send(&harness, event).await.response.unwrap();
    assert!(response.is_ok());
    assert_eq!(response.sync_event_head, 0xabcd);
    assert_eq!(response.major_version, 3);

    let acl = bind_init(&harness).await;
    assert_eq!(acl.sync_event_head, 0);
}

// ============================================================================
// Bind init
// ============================================================================

#[tokio::test]
async fn test_bind_init_creates_and_grants_pipeline_queue() {
    let harness = ready(RouterConfig::default()).await;

    let response = bind_init(&harness).await;
    assert!(response.is_ok());
    let queue_id = response.ret_value;
    assert_eq!(queue_id, LocalQueueService::FIRST_CREATED_ID);
    assert_eq!(harness.router.client_pid(), Some(CLIENT_PID));
    assert_eq!(harness.router.client_group(), (3, 0));
    assert_eq!(
        harness.device.queue_name(0, queue_id).as_deref(),
        Some("bqs_pipeline_4321")
    );
    assert_eq!(
        harness.device.grant_of(0, queue_id, CLIENT_PID),
        Some(QueueAuth::READ_WRITE)
    );

    // a second init returns the same queue
    let again = bind_init(&harness).await;
    assert_eq!(again.ret_value, queue_id);
}

#[tokio::test]
async fn test_bind_init_thread_mode_skips_grant() {
    let harness = ready(RouterConfig {
        deploy_mode: DeployMode::MultiThread,
        ..RouterConfig::default()
    })
    .await;

    let queue_id = bind_init(&harness).await.ret_value;
    assert_eq!(harness.device.grant_of(0, queue_id, CLIENT_PID), None);
}

#[tokio::test]
async fn test_bind_init_rejects_bad_length() {
    let harness = ready(RouterConfig::default()).await;

    let event = QsEvent::new(SubEvent::AclBindQueueInit.id()).with_msg(Bytes::from_static(&[0; 8]));
    let response = send(&harness, event).await.response.unwrap();
    assert_eq!(response.ret_code, BqsStatus::ParamInvalid.code());
    assert_eq!(response.ret_value, MAX_QUEUE_ID_NUM);
}

// ============================================================================
// Relation events
// ============================================================================

#[tokio::test]
async fn test_relation_before_bind_init() {
    let harness = ready(RouterConfig::default()).await;

    let payload = RelationEvent::routes(SubEvent::AclBindQueue.id(), vec![QueueRoute::new(1, 2)]).encode();
    let event = QsEvent::new(SubEvent::AclBindQueue.id()).with_payload(payload);
    let response = send(&harness, event).await.response.unwrap();
    assert_eq!(response.ret_code, BqsStatus::DriverError.code());
}

#[tokio::test]
async fn test_relation_without_payload() {
    let harness = ready(RouterConfig::default()).await;
    bind_init(&harness).await;

    let response = send(&harness, QsEvent::new(SubEvent::AclBindQueue.id()))
        .await
        .response
        .unwrap();
    assert_eq!(response.ret_code, BqsStatus::DriverError.code());
}

#[tokio::test]
async fn test_bind_writes_route_status() {
    let harness = ready(RouterConfig::default()).await;
    let pipeline = bind_init(&harness).await.ret_value;

    let (response, routes) = relation(
        &harness,
        SubEvent::AclBindQueue,
        vec![QueueRoute::new(1, 2), QueueRoute::new(1, 3)],
    )
    .await;
    assert!(response.is_ok());
    assert_eq!(response.sub_event_id, SubEvent::AclBindQueue.id());
    assert_eq!(response.ret_value, pipeline);
    assert!(routes.iter().all(|route| route.status == 1));
    assert_eq!(harness.router.metrics().snapshot().bind_requests, 1);
}

#[tokio::test]
async fn test_bind_partial_failure() {
    let harness = ready(RouterConfig::default()).await;
    bind_init(&harness).await;
    harness.device.set_auth(9, QueueAuth { read: false, write: true });

    let (response, routes) = relation(
        &harness,
        SubEvent::AclBindQueue,
        vec![
            QueueRoute::new(1, 2),
            QueueRoute::new(MAX_QUEUE_ID_NUM, 3),
            QueueRoute::new(9, 4),
        ],
    )
    .await;

    // every route is reported; failed pre-checks fold into an authority error
    assert_eq!(response.ret_code, BqsStatus::QueueAuthError.code());
    let statuses: Vec<i32> = routes.iter().map(|route| route.status).collect();
    assert_eq!(statuses, vec![1, 0, 0]);
}

#[tokio::test]
async fn test_bind_all_routes_rejected() {
    let harness = ready(RouterConfig::default()).await;
    bind_init(&harness).await;

    let (response, routes) = relation(
        &harness,
        SubEvent::AclBindQueue,
        vec![QueueRoute::new(MAX_QUEUE_ID_NUM + 1, 2)],
    )
    .await;
    assert_eq!(response.ret_code, BqsStatus::QueueAuthError.code());
    assert_eq!(routes[0].status, BqsStatus::QueueIdError.code());
}

#[tokio::test]
async fn test_unbind_writes_route_status() {
    let harness = ready(RouterConfig::default()).await;
    bind_init(&harness).await;
    relation(&harness, SubEvent::AclBindQueue, vec![QueueRoute::new(1, 2)]).await;

    let (response, routes) = relation(
        &harness,
        SubEvent::AclUnbindQueue,
        vec![QueueRoute::new(1, 2), QueueRoute::new(MAX_QUEUE_ID_NUM, 2)],
    )
    .await;
    assert_eq!(response.ret_code, BqsStatus::QueueIdError.code());
    let statuses: Vec<i32> = routes.iter().map(|route| route.status).collect();
    assert_eq!(statuses, vec![0, 1]);

    let count = send(
        &harness,
        QsEvent::new(SubEvent::AclQueryQueueNum.id()).with_msg(query_msg(&src_query(1))),
    )
    .await
    .response
    .unwrap();
    assert_eq!(count.ret_value, 0);
}

#[tokio::test]
async fn test_relation_length_mismatch() {
    let harness = ready(RouterConfig::default()).await;
    bind_init(&harness).await;

    let mut payload = RelationEvent::routes(SubEvent::AclBindQueue.id(), vec![QueueRoute::new(1, 2)]).encode();
    payload[0] = 99;
    let event = QsEvent::new(SubEvent::AclBindQueue.id()).with_payload(payload);
    let response = send(&harness, event).await.response.unwrap();
    assert_eq!(response.ret_code, BqsStatus::ParamInvalid.code());
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_query_count_then_detail() {
    let harness = ready(RouterConfig::default()).await;
    bind_init(&harness).await;
    relation(
        &harness,
        SubEvent::AclBindQueue,
        vec![QueueRoute::new(1, 2), QueueRoute::new(1, 3), QueueRoute::new(4, 5)],
    )
    .await;

    let query = src_query(1);
    let count = send(
        &harness,
        QsEvent::new(SubEvent::AclQueryQueueNum.id()).with_msg(query_msg(&query)),
    )
    .await
    .response
    .unwrap();
    assert!(count.is_ok());
    assert_eq!(count.ret_value, 2);

    let payload = RelationEvent::query(SubEvent::AclQueryQueue.id(), query, count.ret_value).encode();
    let delivered = send(
        &harness,
        QsEvent::new(SubEvent::AclQueryQueue.id()).with_payload(payload),
    )
    .await;
    assert!(delivered.response.unwrap().is_ok());

    let routes = RelationEvent::parse(&delivered.payload.unwrap(), true).unwrap().routes;
    let pairs: Vec<(u32, u32, i32)> = routes.iter().map(|r| (r.src_id, r.dst_id, r.status)).collect();
    assert_eq!(pairs, vec![(1, 2, 1), (1, 3, 1)]);
}

#[tokio::test]
async fn test_query_detail_capacity_mismatch() {
    let harness = ready(RouterConfig::default()).await;
    bind_init(&harness).await;
    relation(&harness, SubEvent::AclBindQueue, vec![QueueRoute::new(1, 2)]).await;

    let payload = RelationEvent::query(SubEvent::AclQueryQueue.id(), src_query(1), 3).encode();
    let delivered = send(
        &harness,
        QsEvent::new(SubEvent::AclQueryQueue.id()).with_payload(payload),
    )
    .await;
    assert_eq!(
        delivered.response.unwrap().ret_code,
        BqsStatus::ParamInvalid.code()
    );
}

#[tokio::test]
async fn test_query_num_rejects_bad_length() {
    let harness = ready(RouterConfig::default()).await;

    let event = QsEvent::new(SubEvent::AclQueryQueueNum.id()).with_msg(Bytes::from_static(&[0; 12]));
    let response = send(&harness, event).await.response.unwrap();
    assert_eq!(response.ret_code, BqsStatus::ParamInvalid.code());
    assert_eq!(response.ret_value, 0);
}

#[test]
fn test_query_relations_by_type() {
    let device = Arc::new(LocalQueueService::new());
    let mut ctx = context(device, 0);
    for (src, dst) in [(1, 2), (3, 2), (4, 5)] {
        ctx.relation
            .bind(&EntityInfo::queue(src, 0), &EntityInfo::queue(dst, 0), 0)
            .unwrap();
    }

    let pairs = |query: QueueRouteQuery| -> Vec<(u32, u32, i32)> {
        query_relations(&ctx, &query)
            .iter()
            .map(|r| (r.src_id, r.dst_id, r.status))
            .collect()
    };
    let query = |query_type: u32, src_id: u32, dst_id: u32| QueueRouteQuery {
        query_type,
        src_id,
        dst_id,
        ..QueueRouteQuery::default()
    };

    assert_eq!(pairs(query(1, 0, 2)), vec![(1, 2, 1), (3, 2, 1)]);
    // src-or-dst falls back to dst when src has nothing
    assert_eq!(pairs(query(2, 9, 5)), vec![(4, 5, 1)]);
    assert_eq!(pairs(query(2, 4, 2)), vec![(4, 5, 1)]);
    assert_eq!(pairs(query(3, 3, 2)), vec![(3, 2, 1)]);
    assert!(pairs(query(3, 3, 5)).is_empty());
    assert!(pairs(query(100, 0, 0)).is_empty());
    assert!(pairs(query(42, 1, 2)).is_empty());
}

// ============================================================================
// Config and link status
// ============================================================================

#[tokio::test]
async fn test_config_event_before_bind_init() {
    let harness = ready(RouterConfig::default()).await;

    let routes = vec![Route::new(Endpoint::queue(7), Endpoint::queue(8))];
    let payload = encode_update(&ConfigInfo::new(ConfigCmd::BindRoute, 1), &ConfigBody::Routes(routes));
    let event = QsEvent::new(SubEvent::UpdateConfig.id()).with_payload(payload);
    let response = send(&harness, event).await.response.unwrap();
    assert_eq!(response.ret_code, BqsStatus::DriverError.code());
}

#[tokio::test]
async fn test_config_event_updates_graph() {
    let harness = ready(RouterConfig::default()).await;
    bind_init(&harness).await;

    let routes = vec![Route::new(Endpoint::queue(7), Endpoint::queue(8))];
    let payload = encode_update(&ConfigInfo::new(ConfigCmd::BindRoute, 1), &ConfigBody::Routes(routes));
    let delivered = send(
        &harness,
        QsEvent::new(SubEvent::UpdateConfig.id()).with_payload(payload),
    )
    .await;
    assert!(delivered.response.unwrap().is_ok());
    assert!(delivered.payload.is_some());
    assert_eq!(harness.router.metrics().snapshot().config_events, 1);

    let count = send(
        &harness,
        QsEvent::new(SubEvent::AclQueryQueueNum.id()).with_msg(query_msg(&src_query(7))),
    )
    .await
    .response
    .unwrap();
    assert_eq!(count.ret_value, 1);
}

#[tokio::test]
async fn test_link_status_without_channels() {
    let harness = ready(RouterConfig::default()).await;

    for sub in [SubEvent::QueryLinkStatus, SubEvent::QueryLinkStatusV2] {
        let response = send(&harness, QsEvent::new(sub.id())).await.response.unwrap();
        assert_eq!(response.ret_code, 0);
    }
}
