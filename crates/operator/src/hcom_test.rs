//! Tests for HCOM handle create/destroy

use std::sync::Arc;

use bqs_protocol::config::{
    HCOM_HANDLE_INFO_SIZE, encode_hcom_create, encode_hcom_destroy, read_i32_at, read_u64_at,
};
use bqs_protocol::{BqsStatus, BytesMut, StatusResult};
use bqs_routing::{BindRelation, ChannelInfo, LocalQueueService};

use crate::context::SchedulerContext;
use crate::hccl::{LocalCommService, MemoryRegion};
use crate::operator::{ConfigEventKind, ConfigInfoOperator};

const RANK_TABLE: &[u8] = br#"{"rank_list":[0,1]}"#;

fn setup() -> (Arc<LocalCommService>, SchedulerContext) {
    let comm = Arc::new(LocalCommService::new());
    let relation = BindRelation::new(Arc::new(LocalQueueService::new()));
    let regions = vec![
        MemoryRegion {
            addr: 0x1_0000,
            size: 4096,
        },
        MemoryRegion {
            addr: 0x2_0000,
            size: 4096,
        },
    ];
    let ctx = SchedulerContext::new(relation, comm.clone()).with_memory_regions(regions);
    (comm, ctx)
}

fn run(ctx: &mut SchedulerContext, kind: ConfigEventKind, buf: &mut BytesMut) -> StatusResult {
    ConfigInfoOperator::new(ctx, 2).handle(kind, buf)
}

fn create(ctx: &mut SchedulerContext) -> (BytesMut, StatusResult) {
    let mut buf = encode_hcom_create(0, RANK_TABLE).unwrap();
    let result = run(ctx, ConfigEventKind::CreateHcomHandle, &mut buf);
    (buf, result)
}

fn create_ret(buf: &[u8]) -> i32 {
    read_i32_at(buf, HCOM_HANDLE_INFO_SIZE + RANK_TABLE.len()).unwrap()
}

#[test]
fn test_create_registers_memory() {
    let (comm, mut ctx) = setup();
    let (buf, result) = create(&mut ctx);

    result.unwrap();
    assert_eq!(create_ret(&buf), 0);
    let handle = read_u64_at(&buf, 8).unwrap();
    assert!(comm.is_live(handle));
    assert_eq!(comm.registered(handle), 2);
}

#[test]
fn test_create_register_failure_finalizes() {
    let (comm, mut ctx) = setup();
    comm.fail_register(true);
    let (buf, result) = create(&mut ctx);

    result.unwrap();
    assert_eq!(create_ret(&buf), BqsStatus::HcclError.code());
    assert_eq!(read_u64_at(&buf, 8), Some(0));
    assert_eq!(comm.live_count(), 0);
}

#[test]
fn test_create_init_failure() {
    let (comm, mut ctx) = setup();
    comm.fail_init(true);
    let (buf, result) = create(&mut ctx);
    result.unwrap();
    assert_eq!(create_ret(&buf), BqsStatus::HcclError.code());
}

#[test]
fn test_create_rejects_bad_lengths() {
    let (_, mut ctx) = setup();

    let mut empty = encode_hcom_create(0, &[]).unwrap();
    assert_eq!(
        run(&mut ctx, ConfigEventKind::CreateHcomHandle, &mut empty),
        Err(BqsStatus::ParamInvalid)
    );

    let mut truncated = encode_hcom_create(0, RANK_TABLE).unwrap();
    truncated.truncate(HCOM_HANDLE_INFO_SIZE + 4);
    assert_eq!(
        run(&mut ctx, ConfigEventKind::CreateHcomHandle, &mut truncated),
        Err(BqsStatus::ParamInvalid)
    );

    let mut short = BytesMut::from(&[0u8; 10][..]);
    assert_eq!(
        run(&mut ctx, ConfigEventKind::CreateHcomHandle, &mut short),
        Err(BqsStatus::ParamInvalid)
    );
}

#[test]
fn test_destroy() {
    let (comm, mut ctx) = setup();
    let (buf, _) = create(&mut ctx);
    let handle = read_u64_at(&buf, 8).unwrap();
    ctx.channels.channel_id(&ChannelInfo {
        handle,
        ..ChannelInfo::default()
    });
    ctx.profiles[0].record_hccl_send();

    let mut destroy = encode_hcom_destroy(handle);
    run(&mut ctx, ConfigEventKind::DestroyHcomHandle, &mut destroy).unwrap();

    assert_eq!(read_i32_at(&destroy, HCOM_HANDLE_INFO_SIZE), Some(0));
    assert!(!comm.is_live(handle));
    assert!(ctx.channels.is_empty());
    assert_eq!(ctx.profiles[0].snapshot().hccl_sends, 0);
}

#[test]
fn test_destroy_failures() {
    let (comm, mut ctx) = setup();

    let mut null = encode_hcom_destroy(0);
    assert_eq!(
        run(&mut ctx, ConfigEventKind::DestroyHcomHandle, &mut null),
        Err(BqsStatus::ParamInvalid)
    );

    // unknown handle: unregister failures are tolerated, finalize is not
    let mut unknown = encode_hcom_destroy(0xdead);
    run(&mut ctx, ConfigEventKind::DestroyHcomHandle, &mut unknown).unwrap();
    assert_eq!(
        read_i32_at(&unknown, HCOM_HANDLE_INFO_SIZE),
        Some(BqsStatus::HcclError.code())
    );

    let (buf, _) = create(&mut ctx);
    let handle = read_u64_at(&buf, 8).unwrap();
    comm.fail_finalize(true);
    let mut destroy = encode_hcom_destroy(handle);
    run(&mut ctx, ConfigEventKind::DestroyHcomHandle, &mut destroy).unwrap();
    assert_eq!(
        read_i32_at(&destroy, HCOM_HANDLE_INFO_SIZE),
        Some(BqsStatus::HcclError.code())
    );
}
