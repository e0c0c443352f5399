//! Static dispatch table from adapter roles to their handlers.
//!
//! The table is assembled once at startup. Method resolution inside a
//! handler is an explicit lookup as well; there is no reflection anywhere on
//! the dispatch path.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use gantry_plugins::{ErrorCode, ExecutionFailure};

use crate::protocol::{AdapterName, CallContext, ErrorPayload};

/// Serves the methods of one adapter role.
pub trait AdapterHandler: Send + Sync + 'static {
    /// Handles a single method call with already-claimed arguments.
    fn handle(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
        context: Option<&CallContext>,
    ) -> Result<serde_json::Value, DispatchError>;
}

/// Errors a handler may raise during dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The role does not expose the requested method.
    #[error("method {method} is not exposed")]
    UnknownMethod { method: String },
    /// The handler failed with a structured domain failure.
    #[error(transparent)]
    Failed(#[from] ExecutionFailure),
}

impl DispatchError {
    pub(crate) fn into_payload(self, adapter: AdapterName) -> ErrorPayload {
        match self {
            Self::UnknownMethod { method } => ErrorPayload::new(
                ErrorCode::UnknownMethod,
                format!("adapter {adapter} has no method {method}"),
            ),
            Self::Failed(failure) => failure.into(),
        }
    }
}

/// Startup-time routing table for adapter calls.
#[derive(Default)]
pub struct AdapterRouter {
    handlers: HashMap<AdapterName, Arc<dyn AdapterHandler>>,
}

impl AdapterRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler serving an adapter role, replacing any
    /// previous registration for that role.
    #[must_use]
    pub fn register(mut self, adapter: AdapterName, handler: Arc<dyn AdapterHandler>) -> Self {
        let _ = self.handlers.insert(adapter, handler);
        self
    }

    /// Looks up the handler for a role.
    pub(crate) fn resolve(&self, adapter: AdapterName) -> Option<Arc<dyn AdapterHandler>> {
        self.handlers.get(&adapter).map(Arc::clone)
    }
}

impl std::fmt::Debug for AdapterRouter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AdapterRouter")
            .field("adapters", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
