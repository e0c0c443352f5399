//! Artifact persistence port and its filesystem implementation.
//!
//! Artifacts are written after a successful execution, outside the failure
//! path: a write error is logged and reported through analytics but never
//! turns a successful execution into a failed one.

use std::fs;
use std::io;
use std::path::{Component, PathBuf};

use tracing::debug;

use gantry_plugins::{ArtifactSpec, ExecutionContext};

const ARTIFACT_TARGET: &str = "gantryd::artifacts";

/// Port through which the pipeline persists declared artifacts.
pub trait ArtifactWriter: Send + Sync {
    /// Writes one artifact for the given execution.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] when the artifact cannot be persisted.
    fn write(
        &self,
        context: &ExecutionContext,
        spec: &ArtifactSpec,
        data: &serde_json::Value,
    ) -> io::Result<()>;
}

/// Writes artifacts as JSON files beneath one root directory.
///
/// Files land under `<root>/<tenant>/<trace>/<artifact path>` so repeated
/// runs of the same plugin never clobber each other across traces.
#[derive(Debug)]
pub struct FsArtifactWriter {
    root: PathBuf,
}

impl FsArtifactWriter {
    /// Creates a writer rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn destination(
        &self,
        context: &ExecutionContext,
        spec: &ArtifactSpec,
    ) -> io::Result<PathBuf> {
        let escapes = spec.path.is_absolute()
            || spec
                .path
                .components()
                .any(|component| matches!(component, Component::ParentDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("artifact '{}' escapes the artifact root", spec.name),
            ));
        }
        Ok(self
            .root
            .join(context.tenant_id())
            .join(context.trace_id())
            .join(&spec.path))
    }
}

impl ArtifactWriter for FsArtifactWriter {
    fn write(
        &self,
        context: &ExecutionContext,
        spec: &ArtifactSpec,
        data: &serde_json::Value,
    ) -> io::Result<()> {
        let destination = self.destination(context, spec)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec_pretty(data)?;
        fs::write(&destination, encoded)?;
        debug!(
            target: ARTIFACT_TARGET,
            artifact = spec.name.as_str(),
            path = %destination.display(),
            "artifact written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests;
