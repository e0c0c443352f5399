//! The execution pipeline: every request's path from gate to envelope.
//!
//! Order is load-bearing: manifest resolution, capability gate, input
//! schema, chain admission (nested calls only), quota slot, dispatch,
//! output schema, artifacts. Admission precedes slot acquisition so a
//! rejected nested call wastes no quota, and the slot is released on every
//! path after acquisition. Capability and schema denials are envelope
//! failures, never errors escaping this module.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use gantry_broker::{ResourceBroker, ResourceType};
use gantry_plugins::{
    CapabilityGate, CapabilitySet, ChainLimits, ChainViolation, ErrorCode, ExecutionContext,
    ExecutionFailure, ExecutionManifest, ExecutionMetrics, ExecutionOutcome, PluginRegistry,
    SchemaRegistry, SchemaSide,
};

use crate::analytics::{AnalyticsEvent, AnalyticsSink, events};
use crate::artifacts::ArtifactWriter;
use crate::dispatch::SandboxDispatcher;

const PIPELINE_TARGET: &str = "gantryd::pipeline";

/// One request to execute a plugin handler.
#[derive(Debug)]
pub struct ExecutionRequest {
    /// Target plugin.
    pub plugin_id: String,
    /// Tenant the request executes under.
    pub tenant_id: String,
    /// Handler input, validated against the declared input schema.
    pub input: serde_json::Value,
    /// Capabilities granted to this request.
    pub granted_capabilities: CapabilitySet,
    /// Quota pool the execution draws from.
    pub resource_type: ResourceType,
    /// Context of the calling execution, for nested invocations.
    pub parent: Option<ExecutionContext>,
}

impl ExecutionRequest {
    /// Builds a root request starting a fresh chain.
    #[must_use]
    pub fn root(
        plugin_id: impl Into<String>,
        tenant_id: impl Into<String>,
        input: serde_json::Value,
        granted_capabilities: CapabilitySet,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            tenant_id: tenant_id.into(),
            input,
            granted_capabilities,
            resource_type,
            parent: None,
        }
    }

    /// Marks the request as a nested invocation of the given execution.
    #[must_use]
    pub fn nested_in(mut self, parent: ExecutionContext) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A running execution registered for nested-call lookup.
#[derive(Debug, Clone)]
pub(crate) struct ActiveExecution {
    pub(crate) context: ExecutionContext,
    pub(crate) granted: CapabilitySet,
}

/// Analytics scope carried alongside a request before a context exists.
struct Scope {
    trace_id: String,
    plugin_id: String,
    tenant_id: String,
}

impl Scope {
    fn event(&self, name: &'static str) -> AnalyticsEvent {
        AnalyticsEvent::new(
            name,
            self.trace_id.as_str(),
            self.plugin_id.as_str(),
            self.tenant_id.as_str(),
        )
    }
}

/// Executes plugin handlers behind the host's gates.
pub struct ExecutionPipeline {
    plugins: Arc<PluginRegistry>,
    schemas: Arc<SchemaRegistry>,
    broker: Arc<ResourceBroker>,
    dispatcher: Arc<SandboxDispatcher>,
    analytics: Arc<dyn AnalyticsSink>,
    artifacts: Arc<dyn ArtifactWriter>,
    limits: ChainLimits,
    active: Mutex<HashMap<(String, String), ActiveExecution>>,
}

impl ExecutionPipeline {
    /// Wires a pipeline from its collaborators.
    #[must_use]
    pub fn new(
        plugins: Arc<PluginRegistry>,
        schemas: Arc<SchemaRegistry>,
        broker: Arc<ResourceBroker>,
        dispatcher: Arc<SandboxDispatcher>,
        analytics: Arc<dyn AnalyticsSink>,
        artifacts: Arc<dyn ArtifactWriter>,
        limits: ChainLimits,
    ) -> Self {
        Self {
            plugins,
            schemas,
            broker,
            dispatcher,
            analytics,
            artifacts,
            limits,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Executes one request to completion, returning the uniform envelope.
    pub fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let started_at = SystemTime::now();
        let started = Instant::now();
        // The trace id is minted before any gate so denials emitted ahead of
        // context creation still correlate with the request.
        let scope = Scope {
            trace_id: request.parent.as_ref().map_or_else(
                || Uuid::new_v4().to_string(),
                |parent| parent.trace_id().to_owned(),
            ),
            plugin_id: request.plugin_id.clone(),
            tenant_id: request.tenant_id.clone(),
        };

        let result = self.run(request, &scope);
        let metrics = ExecutionMetrics::new(started_at, started.elapsed());
        match result {
            Ok(data) => {
                self.analytics.emit(scope.event(events::EXEC_FINISHED));
                ExecutionOutcome::success(data, metrics)
            }
            Err(failure) => {
                self.analytics.emit(
                    scope
                        .event(events::EXEC_FAILED)
                        .with_payload(serde_json::json!({"code": failure.code})),
                );
                ExecutionOutcome::failure(failure, metrics)
            }
        }
    }

    /// Re-enters the pipeline for a nested cross-plugin call.
    ///
    /// The caller is identified by its trace and plugin id; its granted
    /// capabilities and chain state carry over to the nested request.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionFailure`] when no execution with the given
    /// trace and plugin id is currently active.
    pub fn invoke_nested(
        &self,
        trace_id: &str,
        caller_plugin_id: &str,
        plugin_id: &str,
        input: serde_json::Value,
        resource_type: ResourceType,
    ) -> Result<ExecutionOutcome, ExecutionFailure> {
        let active = self.active_execution(trace_id, caller_plugin_id).ok_or_else(|| {
            ExecutionFailure::new(
                ErrorCode::Internal,
                format!(
                    "no active execution for trace '{trace_id}' and plugin '{caller_plugin_id}'"
                ),
            )
        })?;
        let request = ExecutionRequest {
            plugin_id: plugin_id.to_owned(),
            tenant_id: active.context.tenant_id().to_owned(),
            input,
            granted_capabilities: active.granted,
            resource_type,
            parent: Some(active.context),
        };
        Ok(self.execute(request))
    }

    fn run(
        &self,
        request: ExecutionRequest,
        scope: &Scope,
    ) -> Result<serde_json::Value, ExecutionFailure> {
        let manifest = self.plugins.get(&request.plugin_id).cloned().ok_or_else(|| {
            ExecutionFailure::new(
                ErrorCode::Internal,
                format!("plugin '{}' is not registered", request.plugin_id),
            )
        })?;

        let check = CapabilityGate::check(
            manifest.required_capabilities(),
            &request.granted_capabilities,
        );
        if !check.ok {
            self.analytics.emit(
                scope
                    .event(events::PERMISSION_DENIED)
                    .with_payload(serde_json::json!({"missing": &check.missing})),
            );
            return Err(ExecutionFailure::capability_missing(check.missing));
        }

        let input_report = self.schemas.validate_declared(
            manifest.input_schema(),
            &request.input,
            SchemaSide::Input,
        );
        if !input_report.ok {
            return Err(ExecutionFailure::schema_validation(
                SchemaSide::Input,
                &input_report.errors,
            ));
        }

        let context = self.admit(&request, &manifest, scope.trace_id.as_str())?;

        // The slot expires with the chain budget so a crashed execution path
        // cannot leak its permit for longer than the chain could have run.
        let slot = self
            .broker
            .acquire_slot(
                request.resource_type,
                &request.tenant_id,
                Some(context.chain().remaining()),
            )
            .ok_or_else(|| {
                ExecutionFailure::new(
                    ErrorCode::QuotaExceeded,
                    format!(
                        "no {} slot available for tenant '{}'",
                        request.resource_type, request.tenant_id
                    ),
                )
            })?;

        self.analytics
            .emit(AnalyticsEvent::for_context(events::EXEC_STARTED, &context));
        debug!(
            target: PIPELINE_TARGET,
            plugin = context.plugin_id(),
            trace = context.trace_id(),
            depth = context.chain().depth(),
            "dispatching handler"
        );

        self.register_active(&context, &request.granted_capabilities);
        let run = self
            .dispatcher
            .run(&context, &manifest, request.input);
        self.clear_active(&context);
        self.broker.release_slot(&slot);

        let data = run?;
        let output_report =
            self.schemas
                .validate_declared(manifest.output_schema(), &data, SchemaSide::Output);
        if !output_report.ok {
            return Err(ExecutionFailure::schema_validation(
                SchemaSide::Output,
                &output_report.errors,
            ));
        }

        self.write_artifacts(&context, &manifest, &data);
        Ok(data)
    }

    /// Builds the execution context, admitting nested calls to the chain.
    fn admit(
        &self,
        request: &ExecutionRequest,
        manifest: &ExecutionManifest,
        trace_id: &str,
    ) -> Result<ExecutionContext, ExecutionFailure> {
        match &request.parent {
            None => Ok(ExecutionContext::root_with_trace(
                trace_id,
                manifest.plugin_id(),
                manifest.version(),
                request.tenant_id.as_str(),
                self.limits,
            )),
            Some(parent) => {
                let admitted = parent
                    .chain()
                    .admit(manifest.plugin_id())
                    .map_err(chain_failure)?;
                Ok(parent.child(manifest.plugin_id(), manifest.version(), admitted))
            }
        }
    }

    fn write_artifacts(
        &self,
        context: &ExecutionContext,
        manifest: &ExecutionManifest,
        data: &serde_json::Value,
    ) {
        for spec in manifest.artifacts() {
            if let Err(error) = self.artifacts.write(context, spec, data) {
                warn!(
                    target: PIPELINE_TARGET,
                    plugin = context.plugin_id(),
                    artifact = spec.name.as_str(),
                    error = %error,
                    "artifact write failed"
                );
                self.analytics.emit(
                    AnalyticsEvent::for_context(events::ARTIFACT_FAILED, context)
                        .with_payload(serde_json::json!({"artifact": spec.name.as_str()})),
                );
            }
        }
    }

    fn active_map(&self) -> MutexGuard<'_, HashMap<(String, String), ActiveExecution>> {
        // The table stays usable even if a registering thread panicked.
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn register_active(&self, context: &ExecutionContext, granted: &CapabilitySet) {
        let key = (
            context.trace_id().to_owned(),
            context.plugin_id().to_owned(),
        );
        let _ = self.active_map().insert(
            key,
            ActiveExecution {
                context: context.clone(),
                granted: granted.clone(),
            },
        );
    }

    fn clear_active(&self, context: &ExecutionContext) {
        let key = (
            context.trace_id().to_owned(),
            context.plugin_id().to_owned(),
        );
        let _ = self.active_map().remove(&key);
    }

    pub(crate) fn active_execution(
        &self,
        trace_id: &str,
        plugin_id: &str,
    ) -> Option<ActiveExecution> {
        self.active_map()
            .get(&(trace_id.to_owned(), plugin_id.to_owned()))
            .cloned()
    }
}

impl std::fmt::Debug for ExecutionPipeline {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ExecutionPipeline")
            .field("plugins", &self.plugins.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Maps a chain violation to the taxonomy: an exhausted budget behaves like
/// a local deadline, everything else is a host-side refusal.
fn chain_failure(violation: ChainViolation) -> ExecutionFailure {
    let code = match violation {
        ChainViolation::BudgetExhausted { .. } => ErrorCode::Timeout,
        ChainViolation::DepthExceeded { .. }
        | ChainViolation::FanOutExceeded { .. }
        | ChainViolation::CycleDetected { .. } => ErrorCode::Internal,
    };
    ExecutionFailure::new(code, format!("chain admission refused: {violation}"))
}

#[cfg(test)]
mod tests;
