//! Plugin model for the Gantry host: capabilities, manifests, schemas,
//! execution contexts, and the error taxonomy.
//!
//! The trusted daemon resolves an [`ExecutionManifest`] for every external
//! request, gates it through the deny-by-default [`CapabilityGate`],
//! validates input and output against schemas compiled once at registration
//! time, and threads a shared [`ChainState`] through nested cross-plugin
//! invocations so depth, fan-out, and the shrinking wall-clock budget are
//! enforced across a whole chain.
//!
//! Every execution finishes as an [`ExecutionOutcome`]: a uniform envelope
//! carrying either the handler output or a structured [`ExecutionFailure`],
//! plus timing metrics. Capability and schema failures never escape as
//! panics or raw errors; they are envelope payloads.

pub mod capability;
pub mod context;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod schema;

pub use capability::{CapabilityCheck, CapabilityGate, CapabilitySet};
pub use context::{ChainLimits, ChainState, ChainViolation, ContextSnapshot, ExecutionContext};
pub use error::{ErrorCode, ExecutionFailure, ExecutionMetrics, ExecutionOutcome};
pub use manifest::{
    ArtifactSpec, ExecutionManifest, ExecutionOverrides, ManifestError, PermissionSpec,
};
pub use registry::{PluginRegistry, RegistryError};
pub use schema::{SchemaError, SchemaRegistry, SchemaReport, SchemaSide};
