//! Execution, chain, quota, and transfer settings with production defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::logging::LogSettings;
use crate::socket::SocketEndpoint;

/// Default handler execution timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default grace period granted after the timeout before hard termination.
pub const DEFAULT_GRACE_MS: u64 = 2_000;
/// Default address-space ceiling for handler subprocesses, in mebibytes.
pub const DEFAULT_MEMORY_MB: u64 = 512;
/// Default inline threshold for adapter call payloads, in bytes (1 MiB).
pub const DEFAULT_MAX_INLINE_BYTES: usize = 1024 * 1024;

/// Strategy used to execute plugin handlers.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ExecutionMode {
    /// One sandboxed OS process per execution. Production default.
    #[default]
    Subprocess,
    /// Run the handler inside the daemon process. Development only; trades
    /// isolation for speed and must be enabled with `debug_inprocess`.
    InProcess,
}

/// Bounds applied to every handler execution.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Wall-clock budget for one handler run, in milliseconds.
    pub timeout_ms: u64,
    /// Additional time the handler gets to unwind after the timeout fires.
    pub grace_ms: u64,
    /// Address-space ceiling for the handler subprocess.
    pub memory_mb: u64,
    /// Execution strategy.
    pub mode: ExecutionMode,
    /// Explicit opt-in required before `InProcess` mode is accepted.
    pub debug_inprocess: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            grace_ms: DEFAULT_GRACE_MS,
            memory_mb: DEFAULT_MEMORY_MB,
            mode: ExecutionMode::default(),
            debug_inprocess: false,
        }
    }
}

/// Budgets shared by every nested invocation descending from one request.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChainSettings {
    /// Maximum nesting depth of cross-plugin invocations.
    pub max_depth: u32,
    /// Maximum number of nested invocations spawned by one chain.
    pub max_fan_out: u32,
    /// Total wall-clock budget for the whole chain, in milliseconds.
    /// `None` inherits the execution timeout.
    pub max_chain_time_ms: Option<u64>,
}

impl ChainSettings {
    /// Resolves the chain budget against the execution timeout.
    #[must_use]
    pub fn chain_time_ms(&self, execution: &ExecutionSettings) -> u64 {
        self.max_chain_time_ms.unwrap_or(execution.timeout_ms)
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_fan_out: 16,
            max_chain_time_ms: None,
        }
    }
}

/// Process-wide default quotas applied to tenants without overrides.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuotaSettings {
    /// Concurrent workflow slots per tenant.
    pub max_concurrent_workflows: u32,
    /// Concurrent job slots per tenant.
    pub max_concurrent_jobs: u32,
    /// Shared slot pool for llm, embedding, and api resources.
    pub api_requests_per_minute: u32,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            max_concurrent_jobs: 20,
            api_requests_per_minute: 60,
        }
    }
}

/// Thresholds for relaying oversized adapter payloads out of band.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BulkTransferSettings {
    /// Largest JSON encoding carried inline in an IPC message.
    pub max_inline_bytes: usize,
    /// Directory receiving spilled payload files.
    pub temp_dir: PathBuf,
}

impl Default for BulkTransferSettings {
    fn default() -> Self {
        Self {
            max_inline_bytes: DEFAULT_MAX_INLINE_BYTES,
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Resource broker maintenance settings.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerSettings {
    /// Interval between expired-slot sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 30_000,
        }
    }
}

/// Aggregated daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Endpoint the adapter IPC server binds to.
    pub adapter_socket: SocketEndpoint,
    /// Logging output settings.
    pub log: LogSettings,
    /// Handler execution bounds.
    pub execution: ExecutionSettings,
    /// Invocation chain budgets.
    pub chain: ChainSettings,
    /// Default tenant quotas.
    pub quotas: QuotaSettings,
    /// Bulk transfer thresholds.
    pub bulk_transfer: BulkTransferSettings,
    /// Broker maintenance settings.
    pub broker: BrokerSettings,
}

impl Config {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `InProcess` mode is selected without the
    /// explicit debug opt-in, or when a zero timeout is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.mode == ExecutionMode::InProcess && !self.execution.debug_inprocess {
            return Err(ConfigError::InProcessWithoutOptIn);
        }
        if self.execution.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter_socket: SocketEndpoint::unix("/run/gantry/adapters.sock"),
            log: LogSettings::default(),
            execution: ExecutionSettings::default(),
            chain: ChainSettings::default(),
            quotas: QuotaSettings::default(),
            bulk_transfer: BulkTransferSettings::default(),
            broker: BrokerSettings::default(),
        }
    }
}

/// Errors produced by [`Config::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// In-process execution requested without the debug opt-in flag.
    #[error("in-process execution requires the debug_inprocess flag")]
    InProcessWithoutOptIn,
    /// The execution timeout was zero.
    #[error("execution timeout must be greater than zero")]
    ZeroTimeout,
}
