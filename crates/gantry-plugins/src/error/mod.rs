//! Error taxonomy and the uniform execution envelope.
//!
//! Every execution — success or failure — is returned as an
//! [`ExecutionOutcome`] carrying either handler output or a structured
//! [`ExecutionFailure`], plus timing metrics. The [`ErrorCode`] wire names
//! are shared with the IPC protocol so a remote failure deserialises into
//! the same taxonomy a local failure uses.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::CapabilitySet;
use crate::schema::SchemaSide;

/// Stable failure codes shared by the pipeline and the IPC protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A required capability was not granted.
    CapabilityMissing,
    /// Handler input or output did not conform to its declared schema.
    SchemaValidationFailed,
    /// The handler exceeded its execution or chain budget.
    Timeout,
    /// The resource broker had no free slot for the tenant.
    QuotaExceeded,
    /// An adapter call named a role outside the allow-list.
    UnknownAdapter,
    /// An adapter call named a method the role does not expose.
    UnknownMethod,
    /// The adapter call's protocol version did not match the server's.
    ProtocolVersionMismatch,
    /// A bulk-transfer temp file was missing or unreadable.
    BulkTransferIoError,
    /// Catch-all for uncaught handler and infrastructure failures.
    Internal,
}

impl ErrorCode {
    /// Maps the code to the HTTP status used at the outer API surface.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::CapabilityMissing => 403,
            Self::SchemaValidationFailed => 422,
            Self::Timeout => 408,
            Self::QuotaExceeded => 429,
            Self::UnknownAdapter | Self::UnknownMethod => 404,
            Self::ProtocolVersionMismatch => 409,
            Self::BulkTransferIoError => 502,
            Self::Internal => 500,
        }
    }
}

/// Structured description of a failed execution.
///
/// Capability and schema failures populate their dedicated fields so
/// callers can inspect the denial programmatically instead of parsing the
/// message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ExecutionFailure {
    /// Taxonomy code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Required capabilities that were not granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_capabilities: Option<CapabilitySet>,
    /// Which validation pass failed, for schema failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_side: Option<SchemaSide>,
    /// Additional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ExecutionFailure {
    /// Builds a failure with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            missing_capabilities: None,
            schema_side: None,
            details: None,
        }
    }

    /// Builds a `CAPABILITY_MISSING` failure listing the missing tokens.
    #[must_use]
    pub fn capability_missing(missing: CapabilitySet) -> Self {
        let tokens: Vec<&str> = missing.iter().collect();
        let mut failure = Self::new(
            ErrorCode::CapabilityMissing,
            format!("missing required capabilities: {}", tokens.join(", ")),
        );
        failure.missing_capabilities = Some(missing);
        failure
    }

    /// Builds a `SCHEMA_VALIDATION_FAILED` failure tagged with the side.
    #[must_use]
    pub fn schema_validation(side: SchemaSide, errors: &[String]) -> Self {
        let mut failure = Self::new(
            ErrorCode::SchemaValidationFailed,
            format!("{side} validation failed: {}", errors.join("; ")),
        );
        failure.schema_side = Some(side);
        failure
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Timing metrics recorded for every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Milliseconds since the Unix epoch when the execution started.
    pub started_at_ms: u64,
    /// Wall-clock duration of the execution in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionMetrics {
    /// Builds metrics from a start timestamp and an elapsed duration.
    #[must_use]
    pub fn new(started_at: SystemTime, elapsed: Duration) -> Self {
        let since_epoch = started_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            started_at_ms: u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Uniform envelope returned by the execution pipeline.
///
/// Exactly one of `data` and `error` is populated, mirrored by `ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// `true` when the handler completed and its output validated.
    pub ok: bool,
    /// Handler output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure description otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    /// Timing metrics, present on both paths.
    pub metrics: ExecutionMetrics,
}

impl ExecutionOutcome {
    /// Builds a successful envelope.
    #[must_use]
    pub const fn success(data: serde_json::Value, metrics: ExecutionMetrics) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            metrics,
        }
    }

    /// Builds a failed envelope.
    #[must_use]
    pub const fn failure(error: ExecutionFailure, metrics: ExecutionMetrics) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
            metrics,
        }
    }

    /// Returns the failure code when the execution failed.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|failure| failure.code)
    }
}

#[cfg(test)]
mod tests;
