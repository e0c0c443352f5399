//! Wire types for the adapter protocol.
//!
//! Every message is one JSON object per newline-terminated line. A call
//! carries a protocol `version`, a correlation `requestId`, an adapter role
//! from the fixed allow-list, a method name, positional arguments, and an
//! optional caller context. The reply carries the same `requestId` and
//! exactly one of `result` or `error`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gantry_plugins::ErrorCode;

use crate::bulk::BulkValue;

/// Version stamped on every outbound call.
pub const PROTOCOL_VERSION: u32 = 1;

/// Discriminator value carried in the `type` field of every response.
pub const RESPONSE_TYPE: &str = "adapter:response";

/// Fixed allow-list of adapter roles a call may address.
///
/// Unknown role names fail deserialisation; the server answers such calls
/// with an `UNKNOWN_ADAPTER` error without closing the connection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum AdapterName {
    Cache,
    Llm,
    Embeddings,
    VectorStore,
    Storage,
    Config,
    Logger,
    Analytics,
    EventBus,
    Invoke,
    Artifacts,
}

/// Caller identity attached to a call for tracing and tenancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    /// Trace id inherited from the originating request.
    pub trace_id: String,
    /// Plugin issuing the call.
    pub plugin_id: String,
    /// Session the call belongs to, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Tenant on whose behalf the call is made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl CallContext {
    /// Builds a context for the given trace and plugin.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            plugin_id: plugin_id.into(),
            session_id: None,
            tenant_id: None,
        }
    }

    /// Attaches a session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attaches a tenant id.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// A single request from a worker to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCall {
    version: u32,
    request_id: String,
    adapter: AdapterName,
    method: String,
    args: Vec<BulkValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<CallContext>,
}

impl AdapterCall {
    /// Builds a call with a fresh request id and the current protocol
    /// version.
    #[must_use]
    pub fn new(adapter: AdapterName, method: impl Into<String>, args: Vec<BulkValue>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: Uuid::new_v4().to_string(),
            adapter,
            method: method.into(),
            args,
            context: None,
        }
    }

    /// Attaches a caller context.
    #[must_use]
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Overrides the stamped protocol version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Returns the stamped protocol version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Returns the correlation id.
    #[must_use]
    pub const fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    /// Returns the addressed adapter role.
    #[must_use]
    pub const fn adapter(&self) -> AdapterName {
        self.adapter
    }

    /// Returns the method name.
    #[must_use]
    pub const fn method(&self) -> &str {
        self.method.as_str()
    }

    /// Returns the positional arguments.
    #[must_use]
    pub fn args(&self) -> &[BulkValue] {
        &self.args
    }

    /// Consumes the call into its arguments and context.
    #[must_use]
    pub fn into_parts(self) -> (String, AdapterName, String, Vec<BulkValue>, Option<CallContext>) {
        (
            self.request_id,
            self.adapter,
            self.method,
            self.args,
            self.context,
        )
    }

    /// Returns the caller context, when present.
    #[must_use]
    pub const fn context(&self) -> Option<&CallContext> {
        self.context.as_ref()
    }
}

/// Serialised failure carried in an error response.
///
/// The code taxonomy is shared with local execution failures so a remote
/// error deserialises into the same shape a local one uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Taxonomy code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Additional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorPayload {
    /// Builds a payload with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<gantry_plugins::ExecutionFailure> for ErrorPayload {
    fn from(failure: gantry_plugins::ExecutionFailure) -> Self {
        Self {
            code: failure.code,
            message: failure.message,
            details: failure.details,
        }
    }
}

/// A single reply from the host to a worker.
///
/// Exactly one of `result` and `error` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterResponse {
    #[serde(rename = "type")]
    kind: String,
    request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<BulkValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

impl AdapterResponse {
    /// Builds a successful response carrying the given result.
    #[must_use]
    pub fn success(request_id: impl Into<String>, result: BulkValue) -> Self {
        Self {
            kind: RESPONSE_TYPE.to_owned(),
            request_id: request_id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response carrying the given payload.
    #[must_use]
    pub fn failure(request_id: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            kind: RESPONSE_TYPE.to_owned(),
            request_id: request_id.into(),
            result: None,
            error: None,
        }
        .with_error(error)
    }

    fn with_error(mut self, error: ErrorPayload) -> Self {
        self.error = Some(error);
        self
    }

    /// Returns the correlation id.
    #[must_use]
    pub const fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    /// Returns true when the response carries a result.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_some()
    }

    /// Consumes the response into its result-or-error body.
    #[must_use]
    pub fn into_body(self) -> Result<Option<BulkValue>, ErrorPayload> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// How the server treats a call whose version differs from its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPolicy {
    /// Log the mismatch and serve the call anyway.
    #[default]
    Lenient,
    /// Answer the call with a `PROTOCOL_VERSION_MISMATCH` error.
    Strict,
}

impl VersionPolicy {
    /// Returns true when the given version differs from the server's.
    #[must_use]
    pub fn is_mismatch(version: u32) -> bool {
        version != PROTOCOL_VERSION
    }

    /// Returns true when a mismatching call must be rejected.
    #[must_use]
    pub fn rejects(self, version: u32) -> bool {
        matches!(self, Self::Strict) && Self::is_mismatch(version)
    }
}

#[cfg(test)]
mod tests;
