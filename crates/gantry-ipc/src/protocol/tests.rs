//! Wire-format tests for calls, responses, and version policy.

use rstest::rstest;
use serde_json::json;

use gantry_plugins::ErrorCode;

use super::*;

#[test]
fn call_serialises_with_camel_case_field_names() {
    let call = AdapterCall::new(
        AdapterName::VectorStore,
        "query",
        vec![BulkValue::Inline(json!({"topK": 5}))],
    )
    .with_context(
        CallContext::new("trace-1", "plugin-a")
            .with_session("session-9")
            .with_tenant("tenant-z"),
    );

    let encoded = serde_json::to_value(&call).expect("serialise call");
    assert_eq!(encoded.get("version"), Some(&json!(1)));
    assert_eq!(encoded.get("adapter"), Some(&json!("vectorStore")));
    assert_eq!(encoded.get("method"), Some(&json!("query")));
    assert!(encoded.get("requestId").is_some(), "requestId on the wire");
    let context = encoded.get("context").expect("context on the wire");
    assert_eq!(context.get("traceId"), Some(&json!("trace-1")));
    assert_eq!(context.get("pluginId"), Some(&json!("plugin-a")));
    assert_eq!(context.get("sessionId"), Some(&json!("session-9")));
    assert_eq!(context.get("tenantId"), Some(&json!("tenant-z")));
}

#[rstest]
#[case(AdapterName::Cache, "cache")]
#[case(AdapterName::Llm, "llm")]
#[case(AdapterName::Embeddings, "embeddings")]
#[case(AdapterName::VectorStore, "vectorStore")]
#[case(AdapterName::Storage, "storage")]
#[case(AdapterName::Config, "config")]
#[case(AdapterName::Logger, "logger")]
#[case(AdapterName::Analytics, "analytics")]
#[case(AdapterName::EventBus, "eventBus")]
#[case(AdapterName::Invoke, "invoke")]
#[case(AdapterName::Artifacts, "artifacts")]
fn adapter_names_use_their_wire_spelling(#[case] name: AdapterName, #[case] wire: &str) {
    assert_eq!(serde_json::to_value(name).expect("serialise"), json!(wire));
    let parsed: AdapterName = serde_json::from_value(json!(wire)).expect("parse");
    assert_eq!(parsed, name);
}

#[test]
fn unknown_adapter_names_fail_deserialisation() {
    let line = json!({
        "version": 1,
        "requestId": "r-1",
        "adapter": "telepathy",
        "method": "read",
        "args": [],
    });
    let result: Result<AdapterCall, _> = serde_json::from_value(line);
    assert!(result.is_err(), "allow-list must reject unknown roles");
}

#[test]
fn response_carries_exactly_one_of_result_or_error() {
    let success = AdapterResponse::success("r-1", BulkValue::Inline(json!(42)));
    let encoded = serde_json::to_value(&success).expect("serialise success");
    assert_eq!(encoded.get("type"), Some(&json!("adapter:response")));
    assert_eq!(encoded.get("requestId"), Some(&json!("r-1")));
    assert_eq!(encoded.get("result"), Some(&json!(42)));
    assert!(encoded.get("error").is_none());

    let failure = AdapterResponse::failure(
        "r-2",
        ErrorPayload::new(ErrorCode::QuotaExceeded, "no free slot"),
    );
    let encoded = serde_json::to_value(&failure).expect("serialise failure");
    assert!(encoded.get("result").is_none());
    assert_eq!(
        encoded
            .get("error")
            .and_then(|error| error.get("code")),
        Some(&json!("QUOTA_EXCEEDED"))
    );
}

#[test]
fn error_payloads_round_trip_the_taxonomy() {
    let payload = ErrorPayload::new(ErrorCode::UnknownMethod, "no such method")
        .with_details(json!({"method": "frobnicate"}));
    let encoded = serde_json::to_string(&payload).expect("serialise payload");
    let decoded: ErrorPayload = serde_json::from_str(&encoded).expect("parse payload");
    assert_eq!(decoded.code, ErrorCode::UnknownMethod);
    assert_eq!(decoded.details, Some(json!({"method": "frobnicate"})));
}

#[rstest]
#[case(VersionPolicy::Lenient, 2, false)]
#[case(VersionPolicy::Strict, 2, true)]
#[case(VersionPolicy::Strict, PROTOCOL_VERSION, false)]
fn version_policy_governs_rejection(
    #[case] policy: VersionPolicy,
    #[case] version: u32,
    #[case] rejected: bool,
) {
    assert_eq!(policy.rejects(version), rejected);
}
