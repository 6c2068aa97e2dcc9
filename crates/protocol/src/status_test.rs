//! Tests for status codes

use crate::status::*;

#[test]
fn test_codes_round_through_wire() {
    for status in [
        BqsStatus::ParamInvalid,
        BqsStatus::QueueAuthError,
        BqsStatus::GroupExistInRoute,
        BqsStatus::DynamicScheduleError,
        BqsStatus::Retry,
    ] {
        assert_eq!(BqsStatus::from_code(status.code()), Some(Err(status)));
    }
}

#[test]
fn test_retry_is_numerically_apart() {
    assert_eq!(BqsStatus::Retry.code(), 100);
    assert_eq!(BqsStatus::Failed.code(), 17);
}

#[test]
fn test_ok_and_unknown_codes() {
    assert_eq!(BqsStatus::from_code(0), Some(Ok(())));
    assert_eq!(BqsStatus::from_code(55), None);
    assert_eq!(status_from_code(55), Err(BqsStatus::InnerError));
}

#[test]
fn test_status_code_of_result() {
    let ok: StatusResult<u32> = Ok(3);
    let err: StatusResult<u32> = Err(BqsStatus::Timeout);
    assert_eq!(status_code(&ok), STATUS_OK);
    assert_eq!(status_code(&err), 8);
}

#[test]
fn test_display() {
    assert_eq!(BqsStatus::NotInit.to_string(), "not initialized");
}
