//! Tests for the in-process queue service

use super::*;

#[test]
fn test_create_queue_assigns_ids() {
    let service = LocalQueueService::new();
    let a = service.create_queue(0, "pipeline-1", 2).unwrap();
    let b = service.create_queue(0, "pipeline-2", 2).unwrap();
    assert_eq!(a, LocalQueueService::FIRST_CREATED_ID);
    assert_eq!(b, a + 1);
    assert_eq!(service.queue_name(0, a).as_deref(), Some("pipeline-1"));
    assert_eq!(service.create_queue(0, "bad", 0), Err(BqsStatus::ParamInvalid));
}

#[test]
fn test_attach_then_auth() {
    let service = LocalQueueService::new();
    assert_eq!(service.queue_auth(0, 5), Err(BqsStatus::DriverError));
    service.attach_queue(0, 5).unwrap();
    assert_eq!(service.queue_auth(0, 5), Ok(QueueAuth::READ_WRITE));
}

#[test]
fn test_failure_injection() {
    let service = LocalQueueService::new();
    service.fail_attach(7);
    service.fail_subscribe(8);
    assert_eq!(service.attach_queue(0, 7), Err(BqsStatus::DriverError));
    assert_eq!(
        service.subscribe(0, 8, QueueEvent::Enqueue),
        Err(BqsStatus::DriverError)
    );

    service.set_auth(
        9,
        QueueAuth {
            read: true,
            write: false,
        },
    );
    service.attach_queue(0, 9).unwrap();
    assert!(!service.queue_auth(0, 9).unwrap().write);
}

#[test]
fn test_subscriptions() {
    let service = LocalQueueService::new();
    service.subscribe(0, 1, QueueEvent::Enqueue).unwrap();
    service.subscribe(0, 1, QueueEvent::FullToNotFull).unwrap();
    assert!(service.is_subscribed(0, 1, QueueEvent::Enqueue));
    assert_eq!(service.subscription_count(), 2);

    service.unsubscribe(0, 1, QueueEvent::Enqueue).unwrap();
    assert!(!service.is_subscribed(0, 1, QueueEvent::Enqueue));
    assert_eq!(service.subscription_count(), 1);
}

#[test]
fn test_queue_contents() {
    let service = LocalQueueService::new();
    service.enqueue(0, 3, 4);
    assert_eq!(service.queue_len(0, 3), Ok(4));
    service.clear_queue(0, 3).unwrap();
    assert_eq!(service.queue_len(0, 3), Ok(0));
    assert_eq!(service.queue_len(0, 99), Ok(0));
}

#[test]
fn test_grant_requires_queue() {
    let service = LocalQueueService::new();
    assert_eq!(
        service.grant_queue(0, 1, 100, QueueAuth::READ_WRITE),
        Err(BqsStatus::DriverError)
    );
    let id = service.create_queue(0, "p", 2).unwrap();
    service.grant_queue(0, id, 100, QueueAuth::READ_WRITE).unwrap();
    assert_eq!(service.grant_of(0, id, 100), Some(QueueAuth::READ_WRITE));
}

#[test]
fn test_channel_link() {
    let service = LocalQueueService::new();
    assert!(service.channel_connected(1, 2));
    service.set_channel_connected(1, 2, false);
    assert!(!service.channel_connected(1, 2));
    service.set_channel_connected(1, 2, true);
    assert!(service.channel_connected(1, 2));
}
