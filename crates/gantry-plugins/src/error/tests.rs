//! Unit tests for the error taxonomy and envelope.

use std::time::{Duration, SystemTime};

use rstest::rstest;

use super::*;

#[rstest]
#[case::capability(ErrorCode::CapabilityMissing, "\"CAPABILITY_MISSING\"")]
#[case::schema(ErrorCode::SchemaValidationFailed, "\"SCHEMA_VALIDATION_FAILED\"")]
#[case::timeout(ErrorCode::Timeout, "\"TIMEOUT\"")]
#[case::quota(ErrorCode::QuotaExceeded, "\"QUOTA_EXCEEDED\"")]
#[case::adapter(ErrorCode::UnknownAdapter, "\"UNKNOWN_ADAPTER\"")]
#[case::method(ErrorCode::UnknownMethod, "\"UNKNOWN_METHOD\"")]
#[case::version(ErrorCode::ProtocolVersionMismatch, "\"PROTOCOL_VERSION_MISMATCH\"")]
#[case::bulk(ErrorCode::BulkTransferIoError, "\"BULK_TRANSFER_IO_ERROR\"")]
#[case::internal(ErrorCode::Internal, "\"INTERNAL\"")]
fn codes_use_stable_wire_names(#[case] code: ErrorCode, #[case] wire: &str) {
    assert_eq!(serde_json::to_string(&code).expect("serialise code"), wire);
}

#[rstest]
#[case(ErrorCode::CapabilityMissing, 403)]
#[case(ErrorCode::SchemaValidationFailed, 422)]
#[case(ErrorCode::QuotaExceeded, 429)]
#[case(ErrorCode::Internal, 500)]
fn http_status_mapping(#[case] code: ErrorCode, #[case] status: u16) {
    assert_eq!(code.http_status(), status);
}

#[test]
fn capability_failure_lists_missing_tokens() {
    let missing: CapabilitySet = ["fs:read"].into_iter().collect();
    let failure = ExecutionFailure::capability_missing(missing.clone());
    assert_eq!(failure.code, ErrorCode::CapabilityMissing);
    assert_eq!(failure.missing_capabilities, Some(missing));
    assert!(failure.message.contains("fs:read"));
}

#[test]
fn schema_failure_is_tagged_with_side() {
    let failure =
        ExecutionFailure::schema_validation(SchemaSide::Input, &["name is required".into()]);
    assert_eq!(failure.schema_side, Some(SchemaSide::Input));
    assert!(failure.message.contains("input"));
}

#[test]
fn failure_round_trips_through_json() {
    let failure = ExecutionFailure::new(ErrorCode::Timeout, "budget exhausted")
        .with_details(serde_json::json!({"timeout_ms": 100}));
    let json = serde_json::to_string(&failure).expect("serialise failure");
    let restored: ExecutionFailure = serde_json::from_str(&json).expect("deserialise");
    assert_eq!(restored, failure);
}

#[test]
fn outcome_populates_exactly_one_branch() {
    let metrics = ExecutionMetrics::new(SystemTime::now(), Duration::from_millis(3));
    let success = ExecutionOutcome::success(serde_json::json!({"n": 1}), metrics);
    assert!(success.ok);
    assert!(success.data.is_some());
    assert!(success.error.is_none());

    let failure = ExecutionOutcome::failure(
        ExecutionFailure::new(ErrorCode::Internal, "boom"),
        metrics,
    );
    assert!(!failure.ok);
    assert!(failure.data.is_none());
    assert_eq!(failure.error_code(), Some(ErrorCode::Internal));
}
