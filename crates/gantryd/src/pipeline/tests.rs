//! End-to-end pipeline tests over the in-process dispatcher.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use serde_json::json;

use gantry_broker::ResourceType;
use gantry_config::{ExecutionMode, ExecutionSettings, QuotaSettings, SocketEndpoint};
use gantry_plugins::{
    ArtifactSpec, CapabilitySet, ChainLimits, ErrorCode, ExecutionManifest, PluginRegistry,
    SchemaRegistry, SchemaSide,
};

use crate::dispatch::{HandlerRequest, HandlerRun, InProcessHandler, SandboxDispatcher};
use crate::test_support::{PipelineHarness, RecordingArtifacts, harness, harness_with_artifacts};

use super::*;

fn settings() -> ExecutionSettings {
    ExecutionSettings {
        timeout_ms: 1_000,
        grace_ms: 100,
        mode: ExecutionMode::InProcess,
        debug_inprocess: true,
        ..ExecutionSettings::default()
    }
}

fn manifest(plugin_id: &str) -> ExecutionManifest {
    ExecutionManifest::new(plugin_id, "1.0.0", PathBuf::from("/usr/libexec/gantry/handler"))
}

fn dispatcher() -> SandboxDispatcher {
    SandboxDispatcher::new(settings(), &SocketEndpoint::tcp("127.0.0.1", 0))
}

fn limits() -> ChainLimits {
    ChainLimits {
        max_depth: 4,
        max_fan_out: 8,
        max_chain_time: Duration::from_secs(5),
    }
}

struct EchoHandler;

impl InProcessHandler for EchoHandler {
    fn run(&self, request: HandlerRequest) -> HandlerRun {
        Ok(request.input)
    }
}

struct CountingHandler(AtomicUsize);

impl InProcessHandler for CountingHandler {
    fn run(&self, request: HandlerRequest) -> HandlerRun {
        let _ = self.0.fetch_add(1, Ordering::SeqCst);
        Ok(request.input)
    }
}

struct SleepyHandler(Duration);

impl InProcessHandler for SleepyHandler {
    fn run(&self, request: HandlerRequest) -> HandlerRun {
        thread::sleep(self.0);
        Ok(request.input)
    }
}

/// Handler that re-enters the pipeline for one nested call per target.
struct NestedCaller {
    pipeline: OnceLock<Arc<ExecutionPipeline>>,
    targets: Vec<String>,
}

impl NestedCaller {
    fn new(targets: &[&str]) -> Self {
        Self {
            pipeline: OnceLock::new(),
            targets: targets.iter().map(|t| String::from(*t)).collect(),
        }
    }
}

impl InProcessHandler for NestedCaller {
    fn run(&self, request: HandlerRequest) -> HandlerRun {
        let pipeline = self.pipeline.get().expect("pipeline injected");
        let mut results = Vec::new();
        for target in &self.targets {
            let outcome = pipeline.invoke_nested(
                &request.context.trace_id,
                &request.context.plugin_id,
                target,
                request.input.clone(),
                ResourceType::Job,
            )?;
            if let Some(error) = outcome.error {
                return Err(error);
            }
            results.push(outcome.data.unwrap_or(serde_json::Value::Null));
        }
        Ok(json!(results))
    }
}

fn echo_harness(plugin_id: &str) -> PipelineHarness {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(manifest(plugin_id), &schemas)
        .expect("register plugin");
    let dispatcher = dispatcher().register_in_process(plugin_id, Arc::new(EchoHandler));
    harness(plugins, schemas, dispatcher, QuotaSettings::default(), limits())
}

#[test]
fn successful_executions_return_data_with_metrics() {
    let harness = echo_harness("echo");
    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "echo",
        "tenant-a",
        json!({"value": 42}),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(outcome.ok);
    assert_eq!(outcome.data, Some(json!({"value": 42})));
    assert!(outcome.error.is_none());
    assert_eq!(
        harness.analytics.names(),
        vec!["exec.started", "exec.finished"]
    );
}

#[test]
fn missing_capabilities_deny_with_a_structured_envelope() {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(
            manifest("secure").with_capabilities(["fs:read", "net:fetch"]),
            &schemas,
        )
        .expect("register plugin");
    let counter = Arc::new(CountingHandler(AtomicUsize::new(0)));
    let dispatcher = dispatcher().register_in_process("secure", Arc::clone(&counter) as Arc<dyn InProcessHandler>);
    let harness = harness(plugins, schemas, dispatcher, QuotaSettings::default(), limits());

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "secure",
        "tenant-a",
        json!({}),
        CapabilitySet::from_iter(["fs:read"]),
        ResourceType::Job,
    ));

    assert!(!outcome.ok);
    let failure = outcome.error.expect("failure");
    assert_eq!(failure.code, ErrorCode::CapabilityMissing);
    let missing = failure.missing_capabilities.expect("missing set");
    assert!(missing.contains("net:fetch"));
    assert!(!missing.contains("fs:read"));

    assert_eq!(counter.0.load(Ordering::SeqCst), 0, "handler never runs");
    assert_eq!(
        harness.analytics.names(),
        vec!["permission.denied", "exec.failed"]
    );
}

#[test]
fn denials_before_admission_carry_a_minted_trace_id() {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(manifest("secure").with_capabilities(["net:fetch"]), &schemas)
        .expect("register plugin");
    let harness = harness(plugins, schemas, dispatcher(), QuotaSettings::default(), limits());

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "secure",
        "tenant-a",
        json!({}),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(!outcome.ok);
    let events = harness.analytics.events();
    let denied = events.first().expect("permission.denied event");
    assert_eq!(denied.name, "permission.denied");
    assert!(!denied.trace_id.is_empty(), "denial must be correlatable");
    let failed = events.get(1).expect("exec.failed event");
    assert_eq!(failed.trace_id, denied.trace_id);
}

#[test]
fn invalid_input_fails_before_dispatch() {
    let mut schemas = SchemaRegistry::new();
    schemas
        .register(
            "greet.input@1",
            &json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"],
            }),
        )
        .expect("register schema");
    let mut plugins = PluginRegistry::new();
    plugins
        .register(manifest("greeter").with_input_schema("greet.input@1"), &schemas)
        .expect("register plugin");
    let counter = Arc::new(CountingHandler(AtomicUsize::new(0)));
    let dispatcher = dispatcher().register_in_process("greeter", Arc::clone(&counter) as Arc<dyn InProcessHandler>);
    let harness = harness(plugins, schemas, dispatcher, QuotaSettings::default(), limits());

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "greeter",
        "tenant-a",
        json!({"name": 7}),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(!outcome.ok);
    let failure = outcome.error.expect("failure");
    assert_eq!(failure.code, ErrorCode::SchemaValidationFailed);
    assert_eq!(failure.schema_side, Some(SchemaSide::Input));
    assert_eq!(counter.0.load(Ordering::SeqCst), 0, "handler never runs");
}

#[test]
fn invalid_output_fails_after_dispatch() {
    let mut schemas = SchemaRegistry::new();
    schemas
        .register("greet.output@1", &json!({"type": "string"}))
        .expect("register schema");
    let mut plugins = PluginRegistry::new();
    plugins
        .register(
            manifest("greeter").with_output_schema("greet.output@1"),
            &schemas,
        )
        .expect("register plugin");
    let dispatcher = dispatcher().register_in_process("greeter", Arc::new(EchoHandler));
    let harness = harness(plugins, schemas, dispatcher, QuotaSettings::default(), limits());

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "greeter",
        "tenant-a",
        json!({"not": "a string"}),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(!outcome.ok);
    let failure = outcome.error.expect("failure");
    assert_eq!(failure.code, ErrorCode::SchemaValidationFailed);
    assert_eq!(failure.schema_side, Some(SchemaSide::Output));
}

#[test]
fn exhausted_quotas_refuse_without_queueing() {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(manifest("slow"), &schemas)
        .expect("register plugin");
    let dispatcher = dispatcher()
        .register_in_process("slow", Arc::new(SleepyHandler(Duration::from_millis(400))));
    let quotas = QuotaSettings {
        max_concurrent_jobs: 1,
        ..QuotaSettings::default()
    };
    let harness = harness(plugins, schemas, dispatcher, quotas, limits());

    let pipeline = Arc::clone(&harness.pipeline);
    let holder = thread::spawn(move || {
        pipeline.execute(ExecutionRequest::root(
            "slow",
            "tenant-a",
            json!(1),
            CapabilitySet::new(),
            ResourceType::Job,
        ))
    });
    // Let the first request claim the only job slot.
    thread::sleep(Duration::from_millis(100));

    let refused = harness.pipeline.execute(ExecutionRequest::root(
        "slow",
        "tenant-a",
        json!(2),
        CapabilitySet::new(),
        ResourceType::Job,
    ));
    assert!(!refused.ok);
    assert_eq!(refused.error_code(), Some(ErrorCode::QuotaExceeded));

    let first = holder.join().expect("join holder");
    assert!(first.ok, "the slot holder completes normally");

    // The slot is back after release.
    let availability = harness.broker.availability(ResourceType::Job, Some("tenant-a"));
    assert_eq!(availability.used, 0);
}

#[test]
fn slots_are_released_after_handler_failures() {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(manifest("sleepy"), &schemas)
        .expect("register plugin");
    let dispatcher = SandboxDispatcher::new(
        ExecutionSettings {
            timeout_ms: 50,
            grace_ms: 20,
            mode: ExecutionMode::InProcess,
            debug_inprocess: true,
            ..ExecutionSettings::default()
        },
        &SocketEndpoint::tcp("127.0.0.1", 0),
    )
    .register_in_process("sleepy", Arc::new(SleepyHandler(Duration::from_secs(1))));
    let harness = harness(plugins, schemas, dispatcher, QuotaSettings::default(), limits());

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "sleepy",
        "tenant-a",
        json!(null),
        CapabilitySet::new(),
        ResourceType::Job,
    ));
    assert_eq!(outcome.error_code(), Some(ErrorCode::Timeout));

    let availability = harness.broker.availability(ResourceType::Job, Some("tenant-a"));
    assert_eq!(availability.used, 0, "slot released on the failure path");
}

#[test]
fn unknown_plugins_fail_with_internal() {
    let harness = echo_harness("echo");
    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "ghost",
        "tenant-a",
        json!(null),
        CapabilitySet::new(),
        ResourceType::Job,
    ));
    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some(ErrorCode::Internal));
}

#[test]
fn artifacts_are_written_after_success() {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(
            manifest("reporter").with_artifacts(vec![ArtifactSpec {
                name: String::from("summary"),
                path: PathBuf::from("summary.json"),
            }]),
            &schemas,
        )
        .expect("register plugin");
    let dispatcher = dispatcher().register_in_process("reporter", Arc::new(EchoHandler));
    let harness = harness(plugins, schemas, dispatcher, QuotaSettings::default(), limits());

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "reporter",
        "tenant-a",
        json!({"rows": 3}),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(outcome.ok);
    assert_eq!(harness.artifacts.written(), vec!["summary"]);
}

#[test]
fn artifact_failures_never_fail_the_execution() {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(
            manifest("reporter").with_artifacts(vec![ArtifactSpec {
                name: String::from("summary"),
                path: PathBuf::from("summary.json"),
            }]),
            &schemas,
        )
        .expect("register plugin");
    let dispatcher = dispatcher().register_in_process("reporter", Arc::new(EchoHandler));
    let harness = harness_with_artifacts(
        plugins,
        schemas,
        dispatcher,
        QuotaSettings::default(),
        limits(),
        Arc::new(RecordingArtifacts::failing()),
    );

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "reporter",
        "tenant-a",
        json!({"rows": 3}),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(outcome.ok, "artifact failure stays out of the envelope");
    assert!(
        harness
            .analytics
            .names()
            .contains(&String::from("artifact.failed"))
    );
}

fn nested_harness(targets: &[&str]) -> (PipelineHarness, Arc<NestedCaller>) {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(manifest("parent"), &schemas)
        .expect("register parent");
    plugins
        .register(manifest("child"), &schemas)
        .expect("register child");
    let caller = Arc::new(NestedCaller::new(targets));
    let dispatcher = dispatcher()
        .register_in_process("parent", Arc::clone(&caller) as Arc<dyn InProcessHandler>)
        .register_in_process("child", Arc::new(EchoHandler));
    let harness = harness(plugins, schemas, dispatcher, QuotaSettings::default(), limits());
    caller
        .pipeline
        .set(Arc::clone(&harness.pipeline))
        .unwrap_or_else(|_| panic!("pipeline injected once"));
    (harness, caller)
}

#[test]
fn nested_invocations_share_the_trace_and_succeed() {
    let (harness, _caller) = nested_harness(&["child"]);

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "parent",
        "tenant-a",
        json!({"payload": true}),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(outcome.ok);
    assert_eq!(outcome.data, Some(json!([{"payload": true}])));

    let events = harness.analytics.events();
    let traces: std::collections::BTreeSet<_> =
        events.iter().map(|event| event.trace_id.clone()).collect();
    assert_eq!(traces.len(), 1, "parent and child share one trace");
    assert_eq!(
        harness.analytics.names(),
        vec![
            "exec.started",
            "exec.started",
            "exec.finished",
            "exec.finished"
        ]
    );
}

#[test]
fn repeated_targets_trip_the_cycle_guard() {
    let (harness, _caller) = nested_harness(&["child", "child"]);

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "parent",
        "tenant-a",
        json!(null),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(!outcome.ok);
    let failure = outcome.error.expect("failure");
    assert_eq!(failure.code, ErrorCode::Internal);
    assert!(failure.message.contains("already visited"));
}

#[test]
fn an_exhausted_chain_budget_maps_to_timeout() {
    let schemas = SchemaRegistry::new();
    let mut plugins = PluginRegistry::new();
    plugins
        .register(manifest("parent"), &schemas)
        .expect("register parent");
    plugins
        .register(manifest("child"), &schemas)
        .expect("register child");
    let caller = Arc::new(NestedCaller::new(&["child"]));
    let dispatcher = dispatcher()
        .register_in_process("parent", Arc::clone(&caller) as Arc<dyn InProcessHandler>)
        .register_in_process("child", Arc::new(EchoHandler));
    let exhausted = ChainLimits {
        max_depth: 4,
        max_fan_out: 8,
        max_chain_time: Duration::ZERO,
    };
    let harness = harness(plugins, schemas, dispatcher, QuotaSettings::default(), exhausted);
    caller
        .pipeline
        .set(Arc::clone(&harness.pipeline))
        .unwrap_or_else(|_| panic!("pipeline injected once"));

    let outcome = harness.pipeline.execute(ExecutionRequest::root(
        "parent",
        "tenant-a",
        json!(null),
        CapabilitySet::new(),
        ResourceType::Job,
    ));

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some(ErrorCode::Timeout));
}

#[test]
fn nested_calls_without_an_active_caller_are_refused() {
    let harness = echo_harness("echo");
    let failure = harness
        .pipeline
        .invoke_nested("no-trace", "nobody", "echo", json!(null), ResourceType::Job)
        .expect_err("no active execution");
    assert_eq!(failure.code, ErrorCode::Internal);
}
