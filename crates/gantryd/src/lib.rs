//! The Gantry daemon: a trusted plugin host.
//!
//! `gantryd` wires the workspace crates into one running process. Every
//! external request flows through the [`pipeline::ExecutionPipeline`]:
//! capability gate, schema validation, chain admission, quota slot, sandbox
//! dispatch, output validation, and artifact persistence, finishing as a
//! uniform envelope either way. Handlers run as sandboxed subprocesses and
//! reach the platform adapters back over the daemon's IPC socket, where the
//! [`adapters`] module serves the real handler implementations, including
//! the `invoke` role that re-enters the pipeline for nested cross-plugin
//! calls.

pub mod adapters;
pub mod analytics;
pub mod artifacts;
pub mod bootstrap;
pub mod dispatch;
pub mod pipeline;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;
