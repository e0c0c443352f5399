//! Process confinement for Gantry plugin handlers.
//!
//! The `gantry-sandbox` crate wraps the [`birdcage`] library with the
//! policy model the host derives from a plugin manifest: filesystem
//! allow-lists with explicit deny carve-outs, an environment allow-list,
//! a network switch, and an address-space ceiling. Callers describe the
//! resources a handler may touch in a [`SandboxPolicy`], then launch the
//! handler through a [`SandboxLauncher`].
//!
//! The policy is restrictive by default:
//! - Networking is disabled unless explicitly enabled.
//! - Environment variables are stripped unless whitelisted.
//! - Executables must be whitelisted and provided as absolute paths.
//! - Standard library locations on Linux are whitelisted by default so
//!   dynamically linked handlers start without exposing the wider
//!   filesystem.
//!
//! The memory ceiling is applied from the parent via `RLIMIT_AS` on the
//! freshly spawned child, keeping enforcement at the process boundary with
//! no instrumentation inside the handler.

pub(crate) mod env_guard;
mod error;
mod launcher;
mod policy;
mod runtime;

pub use birdcage::process;
pub use error::SandboxError;
pub use launcher::{SandboxLauncher, SandboxedChild, SandboxedCommand};
pub use policy::{EnvironmentPolicy, NetworkPolicy, SandboxPolicy};
