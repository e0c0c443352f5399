//! Fire-and-forget analytics notification port.
//!
//! The pipeline emits lifecycle events through an [`AnalyticsSink`]. The
//! production [`ChannelAnalytics`] sink is a bounded channel with
//! drop-on-full semantics: emission never blocks an execution and never
//! fails one. A background worker consumes the channel and logs each event.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use gantry_plugins::ExecutionContext;

const ANALYTICS_TARGET: &str = "gantryd::analytics";

/// Granularity at which the consumer thread re-checks its shutdown flag.
const CONSUME_POLL: Duration = Duration::from_millis(100);

/// Event names emitted by the execution pipeline.
pub mod events {
    /// A handler dispatch is about to start.
    pub const EXEC_STARTED: &str = "exec.started";
    /// An execution completed with a validated result.
    pub const EXEC_FINISHED: &str = "exec.finished";
    /// An execution finished with a failure envelope.
    pub const EXEC_FAILED: &str = "exec.failed";
    /// The capability gate refused a request.
    pub const PERMISSION_DENIED: &str = "permission.denied";
    /// A declared artifact could not be persisted.
    pub const ARTIFACT_FAILED: &str = "artifact.failed";
}

/// One analytics event, scoped to a trace, plugin, and tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    /// Event name, e.g. `exec.finished`.
    pub name: String,
    /// Trace the event belongs to; empty when no context existed yet.
    pub trace_id: String,
    /// Plugin the event concerns.
    pub plugin_id: String,
    /// Tenant the event concerns.
    pub tenant_id: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl AnalyticsEvent {
    /// Builds an event with explicit scope fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        trace_id: impl Into<String>,
        plugin_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            trace_id: trace_id.into(),
            plugin_id: plugin_id.into(),
            tenant_id: tenant_id.into(),
            payload: None,
        }
    }

    /// Builds an event scoped to an execution context.
    #[must_use]
    pub fn for_context(name: impl Into<String>, context: &ExecutionContext) -> Self {
        Self::new(
            name,
            context.trace_id(),
            context.plugin_id(),
            context.tenant_id(),
        )
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Non-blocking notification port consumed by the pipeline.
pub trait AnalyticsSink: Send + Sync {
    /// Emits one event. Must never block or fail the caller.
    fn emit(&self, event: AnalyticsEvent);
}

/// Bounded-channel sink that drops events rather than blocking.
pub struct ChannelAnalytics {
    sender: SyncSender<AnalyticsEvent>,
}

impl ChannelAnalytics {
    /// Starts the sink and its consumer thread.
    #[must_use]
    pub fn start(capacity: usize) -> (Self, AnalyticsWorker) {
        let (sender, receiver) = sync_channel(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || consume(&receiver, &shutdown_flag));
        (
            Self { sender },
            AnalyticsWorker {
                shutdown,
                handle: Some(handle),
            },
        )
    }

    #[cfg(test)]
    pub(crate) fn with_sender(sender: SyncSender<AnalyticsEvent>) -> Self {
        Self { sender }
    }
}

impl AnalyticsSink for ChannelAnalytics {
    fn emit(&self, event: AnalyticsEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(
                    target: ANALYTICS_TARGET,
                    event = event.name.as_str(),
                    "analytics channel full; event dropped"
                );
            }
            Err(TrySendError::Disconnected(event)) => {
                debug!(
                    target: ANALYTICS_TARGET,
                    event = event.name.as_str(),
                    "analytics consumer gone; event dropped"
                );
            }
        }
    }
}

fn consume(receiver: &Receiver<AnalyticsEvent>, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        match receiver.recv_timeout(CONSUME_POLL) {
            Ok(event) => {
                info!(
                    target: ANALYTICS_TARGET,
                    event = event.name.as_str(),
                    trace = event.trace_id.as_str(),
                    plugin = event.plugin_id.as_str(),
                    tenant = event.tenant_id.as_str(),
                    "analytics event"
                );
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Handle to the background analytics consumer thread.
pub struct AnalyticsWorker {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AnalyticsWorker {
    /// Signals the consumer to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Signals shutdown and waits for the thread to exit.
    pub fn join(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}

impl Drop for AnalyticsWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
