//! Tests for configuration queries

use std::sync::Arc;

use bqs_protocol::config::{
    CFG_RET_SIZE, CONFIG_INFO_SIZE, CONFIG_QUERY_SIZE, ChannelAttr, ConfigQuery, Endpoint,
    EndpointAttr, QueryMode, Route, encode_query_data, encode_query_num, query_count_offset,
    read_i32_at, read_u32_at,
};
use bqs_protocol::{BqsStatus, BytesMut, StatusResult};
use bqs_routing::{BindRelation, EntityInfo, LocalQueueService};

use super::*;
use crate::context::SchedulerContext;
use crate::hccl::LocalCommService;
use crate::operator::ConfigEventKind;

fn context() -> SchedulerContext {
    let relation = BindRelation::new(Arc::new(LocalQueueService::new()));
    let mut ctx = SchedulerContext::new(relation, Arc::new(LocalCommService::new()));
    for (src, dst) in [(1, 2), (1, 3), (4, 5)] {
        ctx.relation
            .bind(&EntityInfo::queue(src, 0), &EntityInfo::queue(dst, 0), 0)
            .unwrap();
    }
    ctx.relation.order(0);
    ctx
}

fn run(ctx: &mut SchedulerContext, kind: ConfigEventKind, buf: &mut BytesMut) -> StatusResult {
    ConfigInfoOperator::new(ctx, 2).handle(kind, buf)
}

fn ret(buf: &[u8]) -> i32 {
    read_i32_at(buf, buf.len() - CFG_RET_SIZE).unwrap()
}

/// Count first, then fetch exactly that many routes
fn query_routes(ctx: &mut SchedulerContext, mode: QueryMode, src: u32, dst: u32) -> Vec<Route> {
    let mut query = ConfigQuery::routes(mode, Endpoint::queue(src), Endpoint::queue(dst));
    let mut buf = encode_query_num(&query);
    run(ctx, ConfigEventKind::QueryConfigNum, &mut buf).unwrap();
    assert_eq!(ret(&buf), 0);
    query.count = read_u32_at(&buf, query_count_offset()).unwrap();

    let mut buf = encode_query_data(&query);
    run(ctx, ConfigEventKind::QueryConfig, &mut buf).unwrap();
    assert_eq!(ret(&buf), 0);

    let mut cursor = &buf[CONFIG_QUERY_SIZE + CONFIG_INFO_SIZE..buf.len() - CFG_RET_SIZE];
    (0..query.count)
        .map(|_| Route::get(&mut cursor).unwrap())
        .collect()
}

fn queue_id(endpoint: &Endpoint) -> u32 {
    match endpoint.attr {
        EndpointAttr::Queue { queue_id, .. } => queue_id,
        _ => panic!("not a queue endpoint: {endpoint:?}"),
    }
}

fn ids(routes: &[Route]) -> Vec<(u32, u32)> {
    routes
        .iter()
        .map(|r| (queue_id(&r.src), queue_id(&r.dst)))
        .collect()
}

// ============================================================================
// Route queries
// ============================================================================

#[test]
fn test_query_by_src() {
    let mut ctx = context();
    let routes = query_routes(&mut ctx, QueryMode::Src, 1, 0);
    assert_eq!(ids(&routes), vec![(1, 2), (1, 3)]);
    assert!(routes.iter().all(|r| r.status == ROUTE_STATUS_ACTIVE));
    assert!(routes.iter().all(|r| r.src.status == 1 && r.dst.status == 1));
}

#[test]
fn test_query_by_dst() {
    let mut ctx = context();
    assert_eq!(ids(&query_routes(&mut ctx, QueryMode::Dst, 0, 5)), vec![(4, 5)]);
    assert!(query_routes(&mut ctx, QueryMode::Dst, 0, 1).is_empty());
}

#[test]
fn test_query_by_src_and_dst() {
    let mut ctx = context();
    assert_eq!(ids(&query_routes(&mut ctx, QueryMode::SrcDst, 1, 3)), vec![(1, 3)]);
    assert!(query_routes(&mut ctx, QueryMode::SrcDst, 1, 5).is_empty());
}

#[test]
fn test_query_all() {
    let mut ctx = context();
    let routes = query_routes(&mut ctx, QueryMode::All, 0, 0);
    assert_eq!(ids(&routes), vec![(1, 2), (1, 3), (4, 5)]);
}

#[test]
fn test_query_count_mismatch() {
    let mut ctx = context();
    let mut query = ConfigQuery::routes(QueryMode::Src, Endpoint::queue(1), Endpoint::queue(0));
    query.count = 1;
    let mut buf = encode_query_data(&query);

    assert_eq!(
        run(&mut ctx, ConfigEventKind::QueryConfig, &mut buf),
        Err(BqsStatus::ParamInvalid)
    );
    assert_eq!(ret(&buf), BqsStatus::ParamInvalid.code());
}

#[test]
fn test_query_malformed() {
    let mut ctx = context();

    let mut short = BytesMut::from(&[0u8; 16][..]);
    assert_eq!(
        run(&mut ctx, ConfigEventKind::QueryConfigNum, &mut short),
        Err(BqsStatus::ParamInvalid)
    );

    let query = ConfigQuery {
        mode: 9,
        ..ConfigQuery::routes(QueryMode::Src, Endpoint::queue(1), Endpoint::queue(0))
    };
    let mut buf = encode_query_num(&query);
    assert_eq!(
        run(&mut ctx, ConfigEventKind::QueryConfigNum, &mut buf),
        Err(BqsStatus::ParamInvalid)
    );

    let query = ConfigQuery::routes(QueryMode::Src, Endpoint::queue(1), Endpoint::queue(0));
    let mut buf = encode_query_num(&query);
    buf.extend_from_slice(&[0; 4]);
    assert_eq!(
        run(&mut ctx, ConfigEventKind::QueryConfigNum, &mut buf),
        Err(BqsStatus::ParamInvalid)
    );
}

#[test]
fn test_query_entity_failure() {
    let mut ctx = context();
    let channel = Endpoint::channel(ChannelAttr {
        handle: 1,
        local_tag_id: 2,
        peer_tag_id: 2,
        local_rank_id: 3,
        peer_rank_id: 3,
        ..ChannelAttr::default()
    });
    let query = ConfigQuery::routes(QueryMode::Src, channel, Endpoint::queue(0));
    let mut buf = encode_query_num(&query);
    assert_eq!(
        run(&mut ctx, ConfigEventKind::QueryConfigNum, &mut buf),
        Err(BqsStatus::Failed)
    );
}

// ============================================================================
// Group queries
// ============================================================================

#[test]
fn test_query_group() {
    let mut ctx = context();
    let members = [EntityInfo::queue(7, 0), EntityInfo::queue(8, 0)];
    let group_id = ctx.relation.create_group(&members, 0).unwrap();

    let mut query = ConfigQuery::group(group_id);
    let mut buf = encode_query_num(&query);
    run(&mut ctx, ConfigEventKind::QueryConfigNum, &mut buf).unwrap();
    assert_eq!(ret(&buf), 0);
    query.count = read_u32_at(&buf, query_count_offset()).unwrap();
    assert_eq!(query.count, 2);

    let mut buf = encode_query_data(&query);
    run(&mut ctx, ConfigEventKind::QueryConfig, &mut buf).unwrap();
    let mut cursor = &buf[CONFIG_QUERY_SIZE + CONFIG_INFO_SIZE..];
    let first = Endpoint::get(&mut cursor).unwrap();
    let second = Endpoint::get(&mut cursor).unwrap();
    assert_eq!((queue_id(&first), queue_id(&second)), (7, 8));
}

#[test]
fn test_query_missing_group() {
    let mut ctx = context();
    let mut buf = encode_query_num(&ConfigQuery::group(55));

    // the event succeeds; the result slot reports the missing group
    run(&mut ctx, ConfigEventKind::QueryConfigNum, &mut buf).unwrap();
    assert_eq!(read_u32_at(&buf, query_count_offset()), Some(0));
    assert_eq!(ret(&buf), BqsStatus::GroupNotExist.code());
}
