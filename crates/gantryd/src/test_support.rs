//! Shared fixtures for daemon tests.

use std::io;
use std::sync::{Arc, Mutex};

use gantry_broker::{ResourceBroker, TenantQuotas};
use gantry_config::QuotaSettings;
use gantry_plugins::{
    ArtifactSpec, ChainLimits, ExecutionContext, PluginRegistry, SchemaRegistry,
};

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::artifacts::ArtifactWriter;
use crate::dispatch::SandboxDispatcher;
use crate::pipeline::ExecutionPipeline;

/// Sink capturing emitted events for assertions.
pub(crate) struct RecordingSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.name).collect()
    }
}

impl AnalyticsSink for RecordingSink {
    fn emit(&self, event: AnalyticsEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

/// Artifact writer recording writes in memory, optionally failing them.
pub(crate) struct RecordingArtifacts {
    writes: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingArtifacts {
    pub(crate) fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn written(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl ArtifactWriter for RecordingArtifacts {
    fn write(
        &self,
        _context: &ExecutionContext,
        spec: &ArtifactSpec,
        _data: &serde_json::Value,
    ) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.writes
            .lock()
            .expect("writes lock")
            .push(spec.name.clone());
        Ok(())
    }
}

/// A pipeline wired with recording ports over the given registries.
pub(crate) struct PipelineHarness {
    pub(crate) pipeline: Arc<ExecutionPipeline>,
    pub(crate) analytics: Arc<RecordingSink>,
    pub(crate) artifacts: Arc<RecordingArtifacts>,
    pub(crate) broker: Arc<ResourceBroker>,
}

pub(crate) fn harness(
    plugins: PluginRegistry,
    schemas: SchemaRegistry,
    dispatcher: SandboxDispatcher,
    quotas: QuotaSettings,
    limits: ChainLimits,
) -> PipelineHarness {
    harness_with_artifacts(
        plugins,
        schemas,
        dispatcher,
        quotas,
        limits,
        Arc::new(RecordingArtifacts::new()),
    )
}

pub(crate) fn harness_with_artifacts(
    plugins: PluginRegistry,
    schemas: SchemaRegistry,
    dispatcher: SandboxDispatcher,
    quotas: QuotaSettings,
    limits: ChainLimits,
    artifacts: Arc<RecordingArtifacts>,
) -> PipelineHarness {
    let analytics = Arc::new(RecordingSink::new());
    let broker = Arc::new(ResourceBroker::new(TenantQuotas::from(quotas)));
    let pipeline = Arc::new(ExecutionPipeline::new(
        Arc::new(plugins),
        Arc::new(schemas),
        Arc::clone(&broker),
        Arc::new(dispatcher),
        Arc::clone(&analytics) as Arc<dyn AnalyticsSink>,
        Arc::clone(&artifacts) as Arc<dyn ArtifactWriter>,
        limits,
    ));
    PipelineHarness {
        pipeline,
        analytics,
        artifacts,
        broker,
    }
}
