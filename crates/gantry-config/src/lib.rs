//! Configuration types for the Gantry plugin host.
//!
//! The `gantry-config` crate defines the declarative settings consumed by
//! the daemon and its subsystems: socket endpoints for the adapter IPC
//! channel, logging output, execution bounds, invocation-chain budgets,
//! tenant quota defaults, and bulk-transfer thresholds.
//!
//! Every settings struct derives `serde` traits and carries a `Default`
//! implementation matching the documented production defaults, so a
//! deployment only specifies the values it overrides.

mod logging;
mod settings;
mod socket;

pub use logging::{LogFormat, LogSettings};
pub use settings::{
    BrokerSettings, BulkTransferSettings, ChainSettings, Config, ConfigError, DEFAULT_GRACE_MS,
    DEFAULT_MAX_INLINE_BYTES, DEFAULT_MEMORY_MB, DEFAULT_TIMEOUT_MS, ExecutionMode,
    ExecutionSettings, QuotaSettings,
};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};
