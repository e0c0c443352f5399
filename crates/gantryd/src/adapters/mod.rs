//! Host-side adapter roles served over the proxy socket.
//!
//! Each adapter implements [`AdapterHandler`] for one role. Calls arrive
//! with the caller's [`CallContext`]; the invoke adapter uses it to find
//! the caller's active execution and re-enter the pipeline.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use gantry_broker::{MirrorError, QuotaMirror, ResourceType, TenantQuotas};
use gantry_ipc::{AdapterHandler, CallContext, DispatchError};
use gantry_plugins::{ErrorCode, ExecutionFailure};

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::pipeline::ExecutionPipeline;

const ADAPTER_TARGET: &str = "gantryd::adapters";

fn invalid_call(message: impl Into<String>) -> DispatchError {
    DispatchError::Failed(ExecutionFailure::new(ErrorCode::Internal, message))
}

fn required_context<'a>(context: Option<&'a CallContext>) -> Result<&'a CallContext, DispatchError> {
    context.ok_or_else(|| invalid_call("call context is required for this adapter"))
}

fn claim_str(
    args: &[serde_json::Value],
    index: usize,
    name: &str,
) -> Result<String, DispatchError> {
    args.get(index)
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| invalid_call(format!("argument '{name}' must be a string")))
}

/// Read-only view of host configuration values exposed to handlers.
pub struct ConfigAdapter {
    values: serde_json::Value,
}

impl ConfigAdapter {
    /// Exposes the given value tree; `get` resolves dotted keys within it.
    #[must_use]
    pub fn new(values: serde_json::Value) -> Self {
        Self { values }
    }

    fn lookup(&self, key: &str) -> serde_json::Value {
        let mut current = &self.values;
        for segment in key.split('.') {
            match current.get(segment) {
                Some(value) => current = value,
                None => return serde_json::Value::Null,
            }
        }
        current.clone()
    }
}

impl AdapterHandler for ConfigAdapter {
    fn handle(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
        _context: Option<&CallContext>,
    ) -> Result<serde_json::Value, DispatchError> {
        match method {
            "get" => {
                let key = claim_str(&args, 0, "key")?;
                Ok(self.lookup(&key))
            }
            "all" => Ok(self.values.clone()),
            _ => Err(DispatchError::UnknownMethod {
                method: method.to_owned(),
            }),
        }
    }
}

/// Routes handler log lines into the host's tracing output.
#[derive(Debug, Default)]
pub struct LoggerAdapter;

impl AdapterHandler for LoggerAdapter {
    fn handle(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
        context: Option<&CallContext>,
    ) -> Result<serde_json::Value, DispatchError> {
        let message = claim_str(&args, 0, "message")?;
        let (plugin, trace) = context
            .map(|call| (call.plugin_id.as_str(), call.trace_id.as_str()))
            .unwrap_or(("unknown", "unknown"));
        match method {
            "debug" => debug!(target: ADAPTER_TARGET, plugin, trace, "{message}"),
            "info" => info!(target: ADAPTER_TARGET, plugin, trace, "{message}"),
            "warn" => warn!(target: ADAPTER_TARGET, plugin, trace, "{message}"),
            "error" => error!(target: ADAPTER_TARGET, plugin, trace, "{message}"),
            _ => {
                return Err(DispatchError::UnknownMethod {
                    method: method.to_owned(),
                });
            }
        }
        Ok(serde_json::Value::Null)
    }
}

/// Lets handlers emit analytics events into the host's sink.
pub struct AnalyticsAdapter {
    sink: Arc<dyn AnalyticsSink>,
}

impl AnalyticsAdapter {
    #[must_use]
    pub fn new(sink: Arc<dyn AnalyticsSink>) -> Self {
        Self { sink }
    }
}

impl AdapterHandler for AnalyticsAdapter {
    fn handle(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
        context: Option<&CallContext>,
    ) -> Result<serde_json::Value, DispatchError> {
        if method != "track" {
            return Err(DispatchError::UnknownMethod {
                method: method.to_owned(),
            });
        }
        let call = required_context(context)?;
        let name = claim_str(&args, 0, "event")?;
        let mut event = AnalyticsEvent::new(
            name,
            call.trace_id.as_str(),
            call.plugin_id.as_str(),
            call.tenant_id.as_deref().unwrap_or(""),
        );
        if let Some(payload) = args.into_iter().nth(1) {
            event = event.with_payload(payload);
        }
        self.sink.emit(event);
        Ok(serde_json::Value::Null)
    }
}

/// Lets a running handler invoke another plugin within its chain.
pub struct InvokeAdapter {
    pipeline: Arc<ExecutionPipeline>,
}

impl InvokeAdapter {
    #[must_use]
    pub fn new(pipeline: Arc<ExecutionPipeline>) -> Self {
        Self { pipeline }
    }
}

impl AdapterHandler for InvokeAdapter {
    fn handle(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
        context: Option<&CallContext>,
    ) -> Result<serde_json::Value, DispatchError> {
        if method != "invoke" {
            return Err(DispatchError::UnknownMethod {
                method: method.to_owned(),
            });
        }
        let call = required_context(context)?;
        let plugin_id = claim_str(&args, 0, "pluginId")?;
        let input = args.get(1).cloned().unwrap_or(serde_json::Value::Null);
        let resource_type = match args.get(2) {
            None | Some(serde_json::Value::Null) => ResourceType::Job,
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| invalid_call("argument 'resourceType' is not a resource type"))?,
        };

        let outcome = self.pipeline.invoke_nested(
            &call.trace_id,
            &call.plugin_id,
            &plugin_id,
            input,
            resource_type,
        )?;
        serde_json::to_value(outcome)
            .map_err(|error| invalid_call(format!("outcome serialisation failed: {error}")))
    }
}

/// Mirror that records quota publications in the host log only.
///
/// Stands in for an external cache; enforcement counts never leave the
/// broker regardless of the mirror's fate.
#[derive(Debug, Default)]
pub struct LoggingQuotaMirror;

impl QuotaMirror for LoggingQuotaMirror {
    fn publish(&self, tenant_id: &str, quotas: &TenantQuotas) -> Result<(), MirrorError> {
        debug!(
            target: ADAPTER_TARGET,
            tenant = tenant_id,
            workflows = quotas.max_concurrent_workflows,
            jobs = quotas.max_concurrent_jobs,
            api = quotas.api_requests_per_minute,
            "published tenant quotas"
        );
        Ok(())
    }
}
