//! Tests for configuration update processing

use std::sync::Arc;

use bqs_protocol::config::{
    ConfigBody, ConfigCmd, ConfigInfo, DynamicSchedConfig, Endpoint, EndpointAttr, Route,
    cfg_ret_offset, encode_update, read_i32_at, route_ret_offset,
};
use bqs_protocol::{BqsStatus, BytesMut};
use bqs_routing::{BindRelation, EntityInfo, LocalQueueService, QueueAuth, QueueEvent};

use super::*;
use crate::hccl::{HcclProtocol, LocalCommService};
use crate::profile::ProfilingMode;

struct Harness {
    device: Arc<LocalQueueService>,
    comm: Arc<LocalCommService>,
    ctx: SchedulerContext,
}

impl Harness {
    fn new() -> Self {
        Self::with_numa(false)
    }

    fn with_numa(numa: bool) -> Self {
        let device = Arc::new(LocalQueueService::new());
        let comm = Arc::new(LocalCommService::new());
        let relation = BindRelation::new(device.clone()).with_numa(numa);
        let ctx = SchedulerContext::new(relation, comm.clone()).with_dev_ids(vec![0, 1]);
        Self { device, comm, ctx }
    }

    fn handle(&mut self, buf: &mut BytesMut) -> StatusResult {
        ConfigInfoOperator::new(&mut self.ctx, 2).handle(ConfigEventKind::UpdateConfig, buf)
    }

    fn handle_as(&mut self, client_version: u32, buf: &mut BytesMut) -> StatusResult {
        ConfigInfoOperator::new(&mut self.ctx, client_version).handle(ConfigEventKind::UpdateConfig, buf)
    }
}

fn routes(cmd: ConfigCmd, pairs: &[(u32, u32)]) -> BytesMut {
    let routes = pairs
        .iter()
        .map(|(src, dst)| Route::new(Endpoint::queue(*src), Endpoint::queue(*dst)))
        .collect::<Vec<_>>();
    encode_update(
        &ConfigInfo::new(cmd, routes.len() as u32),
        &ConfigBody::Routes(routes),
    )
}

fn route_ret(buf: &[u8], num: usize, index: usize) -> i32 {
    read_i32_at(buf, route_ret_offset(num, index)).unwrap()
}

fn aggregate(buf: &[u8]) -> i32 {
    read_i32_at(buf, cfg_ret_offset(buf.len())).unwrap()
}

fn command(cmd: ConfigCmd, value: u32, group_id: i32) -> BytesMut {
    let info = ConfigInfo {
        group_id,
        value,
        ..ConfigInfo::new(cmd, 0)
    };
    encode_update(&info, &ConfigBody::Empty)
}

// ============================================================================
// Routes
// ============================================================================

#[test]
fn test_bind_routes() {
    let mut h = Harness::new();
    let mut buf = routes(ConfigCmd::BindRoute, &[(1, 2), (2, 3)]);

    h.handle(&mut buf).unwrap();

    assert_eq!(route_ret(&buf, 2, 0), 0);
    assert_eq!(route_ret(&buf, 2, 1), 0);
    assert_eq!(aggregate(&buf), 0);
    assert_eq!(h.ctx.relation.count_binds(0), 2);
    assert!(!h.ctx.relation.is_order_dirty(0));
    assert!(h.device.is_subscribed(0, 1, QueueEvent::Enqueue));
}

#[test]
fn test_bind_results_are_independent() {
    let mut h = Harness::new();
    let mut buf = routes(ConfigCmd::BindRoute, &[(1, 3), (2, 3), (4, 5)]);

    assert_eq!(h.handle(&mut buf), Err(BqsStatus::QueueIdError));

    assert_eq!(route_ret(&buf, 3, 0), 0);
    assert_eq!(route_ret(&buf, 3, 1), BqsStatus::QueueIdError.code());
    assert_eq!(route_ret(&buf, 3, 2), 0);
    assert_eq!(aggregate(&buf), BqsStatus::QueueIdError.code());
    assert_eq!(h.ctx.relation.count_binds(0), 2);
}

#[test]
fn test_bind_auth_failure_only_fails_its_route() {
    let mut h = Harness::new();
    h.device.set_auth(
        7,
        QueueAuth {
            read: false,
            write: true,
        },
    );
    let mut buf = routes(ConfigCmd::BindRoute, &[(7, 8), (8, 7), (1, 2)]);

    assert_eq!(h.handle(&mut buf), Err(BqsStatus::QueueAuthError));

    assert_eq!(route_ret(&buf, 3, 0), BqsStatus::QueueAuthError.code());
    // 7 may still be written to
    assert_eq!(route_ret(&buf, 3, 1), 0);
    assert_eq!(route_ret(&buf, 3, 2), 0);
    assert_eq!(h.ctx.relation.count_binds(0), 2);
}

#[test]
fn test_bind_attach_failure() {
    let mut h = Harness::new();
    h.device.fail_attach(9);
    let mut buf = routes(ConfigCmd::BindRoute, &[(1, 9)]);

    assert_eq!(h.handle(&mut buf), Err(BqsStatus::DriverError));
    assert_eq!(route_ret(&buf, 1, 0), BqsStatus::DriverError.code());
    assert_eq!(h.ctx.relation.count_binds(0), 0);
}

#[test]
fn test_unbind_routes() {
    let mut h = Harness::new();
    h.handle(&mut routes(ConfigCmd::BindRoute, &[(1, 2), (3, 4)]))
        .unwrap();

    // the second route was never bound; unbind still succeeds
    let mut buf = routes(ConfigCmd::UnbindRoute, &[(1, 2), (5, 6)]);
    h.handle(&mut buf).unwrap();

    assert_eq!(route_ret(&buf, 2, 0), 0);
    assert_eq!(route_ret(&buf, 2, 1), 0);
    assert_eq!(h.ctx.relation.count_binds(0), 1);
    assert!(!h.device.is_subscribed(0, 1, QueueEvent::Enqueue));
}

#[test]
fn test_mem_queue_needs_client_version() {
    let mut h = Harness::new();
    let route = Route::new(Endpoint::mem_queue(1), Endpoint::queue(2));
    let mut buf = encode_update(
        &ConfigInfo::new(ConfigCmd::BindRoute, 1),
        &ConfigBody::Routes(vec![route]),
    );

    assert_eq!(h.handle_as(0, &mut buf), Err(BqsStatus::EndpointMemTypeNotSupport));
    assert_eq!(route_ret(&buf, 1, 0), BqsStatus::EndpointMemTypeNotSupport.code());
    assert_eq!(h.ctx.relation.count_binds(0), 0);
}

#[test]
fn test_numa_routes_go_to_owning_domain() {
    let mut h = Harness::with_numa(true);
    let route = Route::new(
        Endpoint::queue(1).with_res_id(0x8000 | 1),
        Endpoint::queue(2).with_res_id(0x8000 | 1),
    );
    let local = Route::new(Endpoint::queue(3), Endpoint::queue(4));
    let mut buf = encode_update(
        &ConfigInfo::new(ConfigCmd::BindRoute, 2),
        &ConfigBody::Routes(vec![route, local]),
    );

    h.handle(&mut buf).unwrap();

    assert_eq!(h.ctx.relation.count_binds(1), 1);
    assert_eq!(h.ctx.relation.count_binds(0), 1);

    // unbind finds the domain from the existing edge
    let mut buf = encode_update(
        &ConfigInfo::new(ConfigCmd::UnbindRoute, 1),
        &ConfigBody::Routes(vec![route]),
    );
    h.handle(&mut buf).unwrap();
    assert_eq!(h.ctx.relation.count_binds(1), 0);
}

#[test]
fn test_route_count_limits() {
    let mut h = Harness::new();

    let mut empty = encode_update(&ConfigInfo::new(ConfigCmd::BindRoute, 0), &ConfigBody::Empty);
    assert_eq!(h.handle(&mut empty), Err(BqsStatus::ParamInvalid));
    assert_eq!(aggregate(&empty), BqsStatus::ParamInvalid.code());

    let mut too_many = routes(ConfigCmd::BindRoute, &[(1, 2)]);
    too_many[4..8].copy_from_slice(&((MAX_ROUTES_NUM as u32) + 1).to_le_bytes());
    assert_eq!(h.handle(&mut too_many), Err(BqsStatus::ParamInvalid));
}

#[test]
fn test_length_mismatch_rejected() {
    let mut h = Harness::new();
    let mut buf = routes(ConfigCmd::BindRoute, &[(1, 2)]);
    buf.extend_from_slice(&[0; 4]);

    assert_eq!(h.handle(&mut buf), Err(BqsStatus::ParamInvalid));
    assert_eq!(h.ctx.relation.count_binds(0), 0);
}

#[test]
fn test_short_and_unknown_commands() {
    let mut h = Harness::new();

    let mut short = BytesMut::from(&[0u8; 8][..]);
    assert_eq!(h.handle(&mut short), Err(BqsStatus::ParamInvalid));

    let mut unknown = command(ConfigCmd::DelGroup, 0, 0);
    unknown[0..4].copy_from_slice(&42u32.to_le_bytes());
    assert_eq!(h.handle(&mut unknown), Err(BqsStatus::ParamInvalid));
    assert_eq!(aggregate(&unknown), BqsStatus::ParamInvalid.code());
}

#[test]
fn test_process_without_record() {
    let mut h = Harness::new();
    let mut buf = command(ConfigCmd::DelGroup, 0, 1);
    let mut operator = ConfigInfoOperator::new(&mut h.ctx, 2);
    assert_eq!(operator.process_update_config(0, &mut buf), Err(BqsStatus::ParamInvalid));
}

#[test]
fn test_parse_then_process() {
    let mut h = Harness::new();
    let mut buf = routes(ConfigCmd::BindRoute, &[(1, 2)]);
    let mut operator = ConfigInfoOperator::new(&mut h.ctx, 2);

    let phase = operator
        .parse_config_event(ConfigEventKind::UpdateConfig, &mut buf)
        .unwrap();
    assert_eq!(phase, ConfigPhase::Recorded);
    assert_eq!(operator.update().map(UpdateCfgInfo::cmd), Some(ConfigCmd::BindRoute));

    operator.process_update_config(0, &mut buf).unwrap();
    assert_eq!(operator.update().map(UpdateCfgInfo::route_results), Some(vec![Ok(())]));
}

// ============================================================================
// Groups
// ============================================================================

fn add_group(members: Vec<Endpoint>) -> BytesMut {
    encode_update(
        &ConfigInfo::new(ConfigCmd::AddGroup, members.len() as u32),
        &ConfigBody::Endpoints(members),
    )
}

fn group_id_of(buf: &[u8]) -> i32 {
    read_i32_at(buf, 8).unwrap()
}

#[test]
fn test_add_group_writes_id() {
    let mut h = Harness::new();
    let mut buf = add_group(vec![Endpoint::queue(1), Endpoint::queue(2)]);

    h.handle(&mut buf).unwrap();

    let group_id = group_id_of(&buf);
    assert!(group_id > 0);
    assert_eq!(aggregate(&buf), 0);
    let members = h.ctx.relation.group_members(group_id).unwrap();
    assert_eq!(members.len(), 2);
}

#[test]
fn test_add_group_rejects_nested_and_duplicates() {
    let mut h = Harness::new();

    let mut nested = add_group(vec![Endpoint::queue(1), Endpoint::group(3)]);
    assert_eq!(h.handle(&mut nested), Err(BqsStatus::ParamInvalid));

    let mut duplicate = add_group(vec![Endpoint::queue(1), Endpoint::queue(1)]);
    assert_eq!(h.handle(&mut duplicate), Err(BqsStatus::ParamInvalid));
    assert_eq!(aggregate(&duplicate), BqsStatus::ParamInvalid.code());

    assert_eq!(h.ctx.relation.group_count(), 0);
}

#[test]
fn test_add_group_attach_failure_is_atomic() {
    let mut h = Harness::new();
    h.device.fail_attach(2);
    let mut buf = add_group(vec![Endpoint::queue(1), Endpoint::queue(2)]);

    assert_eq!(h.handle(&mut buf), Err(BqsStatus::DriverError));
    assert_eq!(h.ctx.relation.group_count(), 0);
}

#[test]
fn test_delete_group() {
    let mut h = Harness::new();
    let mut buf = add_group(vec![Endpoint::queue(1), Endpoint::queue(2)]);
    h.handle(&mut buf).unwrap();
    let group_id = group_id_of(&buf);

    let mut del = command(ConfigCmd::DelGroup, 0, group_id);
    h.handle(&mut del).unwrap();
    assert!(h.ctx.relation.group_members(group_id).is_none());

    // unknown ids succeed
    let mut del = command(ConfigCmd::DelGroup, 0, 999);
    h.handle(&mut del).unwrap();
}

#[test]
fn test_delete_group_in_route() {
    let mut h = Harness::new();
    let mut buf = add_group(vec![Endpoint::queue(1), Endpoint::queue(2)]);
    h.handle(&mut buf).unwrap();
    let group_id = group_id_of(&buf);

    let route = Route::new(Endpoint::queue(5), Endpoint::group(group_id));
    let mut bind = encode_update(
        &ConfigInfo::new(ConfigCmd::BindRoute, 1),
        &ConfigBody::Routes(vec![route]),
    );
    h.handle(&mut bind).unwrap();
    assert!(h.device.is_subscribed(0, 2, QueueEvent::FullToNotFull));

    let mut del = command(ConfigCmd::DelGroup, 0, group_id);
    assert_eq!(h.handle(&mut del), Err(BqsStatus::GroupExistInRoute));
    assert_eq!(aggregate(&del), BqsStatus::GroupExistInRoute.code());
}

#[test]
fn test_delete_group_drops_member_channels() {
    let mut h = Harness::new();
    let attr = bqs_protocol::config::ChannelAttr {
        handle: 0x10,
        local_tag_id: 3,
        peer_tag_id: 3,
        local_rank_id: 0,
        peer_rank_id: 1,
        local_tag_depth: 16,
        peer_tag_depth: 16,
    };
    let mut buf = add_group(vec![Endpoint::channel(attr), Endpoint::queue(1)]);
    h.handle(&mut buf).unwrap();
    assert_eq!(h.ctx.channels.len(), 1);

    let mut del = command(ConfigCmd::DelGroup, 0, group_id_of(&buf));
    h.handle(&mut del).unwrap();
    assert!(h.ctx.channels.is_empty());
}

#[test]
fn test_bind_to_unknown_group() {
    let mut h = Harness::new();
    let route = Route::new(Endpoint::queue(5), Endpoint::group(77));
    let mut buf = encode_update(
        &ConfigInfo::new(ConfigCmd::BindRoute, 1),
        &ConfigBody::Routes(vec![route]),
    );
    assert_eq!(h.handle(&mut buf), Err(BqsStatus::GroupNotExist));
}

// ============================================================================
// Profiling and HCCL protocol
// ============================================================================

#[test]
fn test_update_profiling() {
    let mut h = Harness::with_numa(true);
    h.ctx.profiles[0].record_enqueue_event();

    h.handle(&mut command(ConfigCmd::UpdateProfiling, 1, 0))
        .unwrap();
    assert_eq!(h.ctx.profiles[0].mode(), ProfilingMode::Open);
    assert_eq!(h.ctx.profiles[1].mode(), ProfilingMode::Open);
    assert_eq!(h.ctx.profiles[0].snapshot().enqueue_events, 0);

    let mut invalid = command(ConfigCmd::UpdateProfiling, 5, 0);
    assert_eq!(h.handle(&mut invalid), Err(BqsStatus::ParamInvalid));
    assert_eq!(aggregate(&invalid), BqsStatus::ParamInvalid.code());
}

#[test]
fn test_update_hccl_protocol() {
    let mut h = Harness::new();

    h.handle(&mut command(ConfigCmd::UpdateHcclProtocol, 1, 0))
        .unwrap();
    assert_eq!(h.ctx.hccl_protocol, Some(HcclProtocol::Tcp));
    assert_eq!(h.comm.protocol(), Some(HcclProtocol::Tcp));

    let mut invalid = command(ConfigCmd::UpdateHcclProtocol, 2, 0);
    assert_eq!(h.handle(&mut invalid), Err(BqsStatus::ParamInvalid));
    assert_eq!(h.ctx.hccl_protocol, Some(HcclProtocol::Tcp));
}

#[test]
fn test_single_domain_commands_skip_extra_domain() {
    let mut h = Harness::with_numa(true);
    let mut buf = command(ConfigCmd::UpdateHcclProtocol, 0, 0);
    let mut operator = ConfigInfoOperator::new(&mut h.ctx, 2);
    operator
        .parse_config_event(ConfigEventKind::UpdateConfig, &mut buf)
        .unwrap();

    operator.process_update_config(1, &mut buf).unwrap();
    assert_eq!(operator.ctx.hccl_protocol, None);

    operator.process_update_config(0, &mut buf).unwrap();
    assert_eq!(operator.ctx.hccl_protocol, Some(HcclProtocol::Rdma));
}

// ============================================================================
// Dynamic schedule
// ============================================================================

fn init_dynamic_sched(root_model_id: u32, request: u32, response: u32, res_id: u16) -> BytesMut {
    encode_update(
        &ConfigInfo::new(ConfigCmd::InitDynamicSched, 1),
        &ConfigBody::DynamicSched(DynamicSchedConfig {
            root_model_id,
            request_queue_id: request,
            response_queue_id: response,
            res_id,
        }),
    )
}

#[test]
fn test_init_dynamic_sched() {
    let mut h = Harness::new();
    h.handle(&mut init_dynamic_sched(4, 20, 21, 0)).unwrap();

    assert_eq!(h.ctx.dynamic_sched[0].root_model_count(), 1);
    assert!(h.device.is_subscribed(0, 20, QueueEvent::FullToNotFull));
    assert!(h.device.is_subscribed(0, 21, QueueEvent::Enqueue));
    let (request, response) = h.ctx.schedule_config.queues(4).unwrap();
    assert_eq!((request.queue_id, response.queue_id), (20, 21));

    let mut again = init_dynamic_sched(4, 20, 21, 0);
    assert_eq!(h.handle(&mut again), Err(BqsStatus::DynamicScheduleError));
    assert_eq!(aggregate(&again), BqsStatus::DynamicScheduleError.code());
}

#[test]
fn test_init_dynamic_sched_host_queues_not_subscribed() {
    let mut h = Harness::new();
    h.handle(&mut init_dynamic_sched(4, 20, 21, 1 << 14)).unwrap();
    assert!(!h.device.is_subscribed(0, 20, QueueEvent::FullToNotFull));
    assert_eq!(h.ctx.dynamic_sched[0].root_model_count(), 1);
}

#[test]
fn test_init_dynamic_sched_failures() {
    let mut h = Harness::new();
    h.device.fail_attach(30);
    assert_eq!(
        h.handle(&mut init_dynamic_sched(1, 30, 31, 0)),
        Err(BqsStatus::DriverError)
    );

    h.device.fail_subscribe(41);
    assert_eq!(
        h.handle(&mut init_dynamic_sched(2, 40, 41, 0)),
        Err(BqsStatus::InnerError)
    );
}

// ============================================================================
// Stop and restart
// ============================================================================

fn schedule_cmd(cmd: ConfigCmd, ids: Vec<u32>) -> BytesMut {
    encode_update(
        &ConfigInfo::new(cmd, ids.len() as u32),
        &ConfigBody::RootModels(ids),
    )
}

#[test]
fn test_stop_and_restart_schedule() {
    let mut h = Harness::new();
    let route = Route::new(
        Endpoint::queue(1).with_root_model(7),
        Endpoint::queue(2).with_root_model(7),
    );
    h.handle(&mut encode_update(
        &ConfigInfo::new(ConfigCmd::BindRoute, 1),
        &ConfigBody::Routes(vec![route]),
    ))
    .unwrap();
    h.device.enqueue(0, 1, 3);
    h.ctx.dynamic_sched[0].cache_route(1, 100);
    h.ctx.dynamic_sched[0].push_response(crate::schedule::SchedResponse {
        root_model_id: 7,
        model_uuid: 70,
    });

    h.handle(&mut schedule_cmd(ConfigCmd::StopSchedule, vec![7]))
        .unwrap();
    assert!(h.ctx.schedule_config.is_stopped(7));
    assert_eq!(h.ctx.dynamic_sched[0].cached_route_count(), 0);

    h.handle(&mut schedule_cmd(ConfigCmd::ClearAndRestartSchedule, vec![7]))
        .unwrap();
    assert!(!h.ctx.schedule_config.is_stopped(7));
    assert_eq!(h.ctx.dynamic_sched[0].pending_responses(7), 0);
    let len = h.ctx.device().queue_len(0, 1).unwrap();
    assert_eq!(len, 0);
}

#[test]
fn test_stop_length_checked() {
    let mut h = Harness::new();
    let mut buf = schedule_cmd(ConfigCmd::StopSchedule, vec![1, 2]);
    buf[4..8].copy_from_slice(&3u32.to_le_bytes());
    assert_eq!(h.handle(&mut buf), Err(BqsStatus::ParamInvalid));
}

#[test]
fn test_group_endpoint_attr_is_kept() {
    // group endpoints carry their policy through conversion
    let mut h = Harness::new();
    let mut buf = add_group(vec![Endpoint::queue(1)]);
    h.handle(&mut buf).unwrap();
    let group_id = group_id_of(&buf);
    let endpoint = Endpoint {
        attr: EndpointAttr::Group { group_id, policy: 1 },
        ..Endpoint::group(group_id)
    };
    let route = Route::new(Endpoint::queue(9), endpoint);
    h.handle(&mut encode_update(
        &ConfigInfo::new(ConfigCmd::BindRoute, 1),
        &ConfigBody::Routes(vec![route]),
    ))
    .unwrap();

    let src = EntityInfo::queue(9, 0);
    let dsts = h.ctx.relation.dsts_of(&src, 0);
    assert_eq!(dsts.len(), 1);
    assert_eq!(dsts[0].group_policy, bqs_routing::GroupPolicy::Broadcast);
}
