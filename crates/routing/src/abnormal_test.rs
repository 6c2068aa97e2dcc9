//! Tests for abnormal relation tracking

use std::sync::Arc;

use super::*;
use crate::LocalQueueService;

fn relation() -> BindRelation {
    BindRelation::new(Arc::new(LocalQueueService::new()))
}

fn q(id: u32) -> EntityInfo {
    EntityInfo::queue(id, 0)
}

#[test]
fn test_mark_and_update_moves_edges() {
    let mut relation = relation();
    relation.bind(&q(1), &q(2), 0).unwrap();
    relation.bind(&q(1), &q(3), 0).unwrap();
    relation.bind(&q(4), &q(5), 0).unwrap();
    relation.order(0);

    relation.mark_abnormal_src(&q(1), 0);
    relation.mark_abnormal_dst(&q(5), 0);
    assert_eq!(relation.pending_abnormal(0), 2);
    assert_eq!(relation.update_relation(0), 3);
    assert_eq!(relation.pending_abnormal(0), 0);

    assert_eq!(relation.count_binds(0), 0);
    assert_eq!(relation.count_abnormal_binds(0), 3);
    assert_eq!(relation.abnormal_dsts_of(&q(1), 0), vec![&q(2), &q(3)]);
    assert_eq!(relation.abnormal_srcs_of(&q(5), 0), vec![&q(4)]);
    assert!(!relation.is_order_dirty(0));
    assert!(relation.is_consistent());
}

#[test]
fn test_abnormal_edges_still_count_for_binding() {
    let mut relation = relation();
    relation.bind(&q(1), &q(2), 0).unwrap();
    relation.mark_abnormal_src(&q(1), 0);
    relation.update_relation(0);

    // re-binding the same edge is accepted without moving it back
    relation.bind(&q(1), &q(2), 0).unwrap();
    assert!(relation.has_abnormal_edge(&q(1), &q(2), 0));
    assert!(!relation.has_edge(&q(1), &q(2), 0));

    assert_eq!(relation.bind(&q(3), &q(2), 0), Err(BqsStatus::QueueIdError));
}

#[test]
fn test_append_and_clear() {
    let mut relation = relation();
    relation.append_abnormal_entity(&q(1), &q(2), 0).unwrap();
    assert!(relation.has_abnormal_edge(&q(1), &q(2), 0));
    assert_eq!(
        relation.append_abnormal_entity(&q(1), &q(1), 0),
        Err(BqsStatus::ParamInvalid)
    );

    relation.clear_abnormal(&q(1), &q(2), 0).unwrap();
    assert!(relation.has_edge(&q(1), &q(2), 0));
    assert!(!relation.has_abnormal_edge(&q(1), &q(2), 0));
    assert!(relation.is_order_dirty(0));
    assert!(relation.is_consistent());

    // clearing a healthy edge changes nothing
    relation.clear_abnormal(&q(1), &q(2), 0).unwrap();
    assert_eq!(relation.count_binds(0), 1);
}

#[test]
fn test_restore_rejects_loop() {
    let mut relation = relation();
    relation.bind(&q(1), &q(2), 0).unwrap();
    relation.mark_abnormal_src(&q(1), 0);
    relation.update_relation(0);

    // the reverse edge is legal while 1 -> 2 is parked
    relation.bind(&q(2), &q(1), 0).unwrap();
    assert_eq!(
        relation.clear_abnormal(&q(1), &q(2), 0),
        Err(BqsStatus::DynamicScheduleError)
    );
    assert!(relation.has_abnormal_edge(&q(1), &q(2), 0));
    assert!(!relation.has_edge(&q(1), &q(2), 0));

    relation.order(0);
    assert!(!relation.has_loop(0));
    assert!(relation.is_consistent());

    relation.unbind(&q(2), &q(1), 0).unwrap();
    relation.clear_abnormal(&q(1), &q(2), 0).unwrap();
    assert!(relation.has_edge(&q(1), &q(2), 0));
}

#[test]
fn test_restore_rejects_group_member_edge() {
    let mut relation = relation();
    let group_id = relation.create_group(&[q(1), q(2)], 0).unwrap();
    let group = EntityInfo::group(group_id, 0);
    relation.append_abnormal_entity(&group, &q(1), 0).unwrap();

    assert_eq!(
        relation.clear_abnormal(&group, &q(1), 0),
        Err(BqsStatus::EntityExist)
    );
    assert!(relation.has_abnormal_edge(&group, &q(1), 0));
    assert_eq!(relation.count_binds(0), 0);
}

#[test]
fn test_append_moves_live_edge() {
    let mut relation = relation();
    relation.bind(&q(1), &q(2), 0).unwrap();
    relation.append_abnormal_entity(&q(1), &q(2), 0).unwrap();
    assert_eq!(relation.count_binds(0), 0);
    assert_eq!(relation.count_abnormal_binds(0), 1);
}

#[test]
fn test_unbind_abnormal_edge() {
    let mut relation = relation();
    relation.bind(&q(1), &q(2), 0).unwrap();
    relation.mark_abnormal_dst(&q(2), 0);
    relation.update_relation(0);

    relation.unbind(&q(1), &q(2), 0).unwrap();
    assert_eq!(relation.count_abnormal_binds(0), 0);
    assert_eq!(relation.entity_count(), 0);
}

#[test]
fn test_marks_for_unknown_entities_are_ignored() {
    let mut relation = relation();
    relation.mark_abnormal_src(&q(9), 0);
    relation.mark_abnormal_src(&q(9), 5);
    assert_eq!(relation.update_relation(0), 0);
    assert_eq!(relation.update_relation(5), 0);
}
