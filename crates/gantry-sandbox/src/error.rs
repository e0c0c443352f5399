//! Domain errors raised by the sandbox wrapper.

use std::io;
use std::path::PathBuf;

use birdcage::error::Error as BirdcageError;
use thiserror::Error;

/// Errors raised while preparing or launching a sandboxed process.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The supplied program path was not absolute.
    #[error("sandboxed commands require absolute program paths, got {0}")]
    ProgramNotAbsolute(PathBuf),

    /// The program was not whitelisted in the policy.
    #[error("executable {program} is not authorised by the sandbox policy")]
    ExecutableNotAuthorised { program: PathBuf },

    /// The supplied path does not exist and therefore cannot be whitelisted.
    #[error("path {path} does not exist on the host filesystem")]
    MissingPath { path: PathBuf },

    /// Canonicalisation of a path failed.
    #[error("failed to canonicalise {path}: {source}")]
    CanonicalisationFailed { path: PathBuf, source: io::Error },

    /// Applying the address-space ceiling to the child failed.
    #[error("failed to apply memory ceiling of {memory_mb} MiB to pid {pid}: {message}")]
    MemoryLimit {
        pid: u32,
        memory_mb: u64,
        message: String,
    },

    /// The underlying sandbox library rejected activation.
    #[error("birdcage activation failed: {0}")]
    Activation(#[from] BirdcageError),
}
