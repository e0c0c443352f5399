//! Execution manifests describing plugin identity, permissions, and bounds.
//!
//! A manifest declares everything the host needs before it will dispatch a
//! plugin handler: required capabilities, input/output schema references,
//! sandbox permissions, execution overrides, artifact declarations, and the
//! handler executable. Manifests are validated on registration so obviously
//! broken declarations are rejected before any request arrives.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::CapabilitySet;

/// Sandbox permissions granted to a handler process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSpec {
    /// Environment variables the handler may inherit.
    pub env_allow: Vec<String>,
    /// Paths the handler may read.
    pub fs_read: Vec<PathBuf>,
    /// Paths the handler may read and write.
    pub fs_write: Vec<PathBuf>,
    /// Paths explicitly denied even when covered by an allow entry.
    pub fs_deny: Vec<PathBuf>,
    /// Whether the handler may use the network.
    pub net_allow: bool,
}

/// Per-plugin overrides of the host execution defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOverrides {
    /// Override of the execution timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Override of the termination grace period in milliseconds.
    pub grace_ms: Option<u64>,
    /// Override of the address-space ceiling in mebibytes.
    pub memory_mb: Option<u64>,
}

/// An artifact the host writes after a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact name, unique within the manifest.
    pub name: String,
    /// Destination path relative to the artifact root.
    pub path: PathBuf,
}

/// Declarative description of one plugin handler.
///
/// # Example
///
/// ```
/// use gantry_plugins::manifest::ExecutionManifest;
/// use std::path::PathBuf;
///
/// let manifest = ExecutionManifest::new(
///     "greeter",
///     "1.0.0",
///     PathBuf::from("/usr/libexec/gantry/greeter"),
/// )
/// .with_capabilities(["net:fetch"])
/// .with_input_schema("greet.input@1");
/// assert_eq!(manifest.plugin_id(), "greeter");
/// manifest.validate().expect("manifest is valid");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionManifest {
    plugin_id: String,
    version: String,
    executable: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    required_capabilities: CapabilitySet,
    #[serde(default)]
    input_schema: Option<String>,
    #[serde(default)]
    output_schema: Option<String>,
    #[serde(default)]
    permissions: PermissionSpec,
    #[serde(default)]
    execution: ExecutionOverrides,
    #[serde(default)]
    artifacts: Vec<ArtifactSpec>,
}

impl ExecutionManifest {
    /// Creates a manifest with the given identity and executable.
    #[must_use]
    pub fn new(
        plugin_id: impl Into<String>,
        version: impl Into<String>,
        executable: PathBuf,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version: version.into(),
            executable,
            args: Vec::new(),
            required_capabilities: CapabilitySet::new(),
            input_schema: None,
            output_schema: None,
            permissions: PermissionSpec::default(),
            execution: ExecutionOverrides::default(),
            artifacts: Vec::new(),
        }
    }

    /// Sets the handler's required capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = tokens.into_iter().collect();
        self
    }

    /// Declares the input schema reference.
    #[must_use]
    pub fn with_input_schema(mut self, reference: impl Into<String>) -> Self {
        self.input_schema = Some(reference.into());
        self
    }

    /// Declares the output schema reference.
    #[must_use]
    pub fn with_output_schema(mut self, reference: impl Into<String>) -> Self {
        self.output_schema = Some(reference.into());
        self
    }

    /// Sets the sandbox permissions.
    #[must_use]
    pub fn with_permissions(mut self, permissions: PermissionSpec) -> Self {
        self.permissions = permissions;
        self
    }

    /// Sets the execution overrides.
    #[must_use]
    pub const fn with_execution(mut self, overrides: ExecutionOverrides) -> Self {
        self.execution = overrides;
        self
    }

    /// Adds handler arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Declares artifacts written after a successful run.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<ArtifactSpec>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Returns the plugin identifier.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Returns the plugin version.
    #[must_use]
    pub fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Returns the handler executable path.
    #[must_use]
    pub fn executable(&self) -> &Path {
        self.executable.as_path()
    }

    /// Returns the handler arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the required capabilities.
    #[must_use]
    pub const fn required_capabilities(&self) -> &CapabilitySet {
        &self.required_capabilities
    }

    /// Returns the input schema reference, when declared.
    #[must_use]
    pub fn input_schema(&self) -> Option<&str> {
        self.input_schema.as_deref()
    }

    /// Returns the output schema reference, when declared.
    #[must_use]
    pub fn output_schema(&self) -> Option<&str> {
        self.output_schema.as_deref()
    }

    /// Returns the sandbox permissions.
    #[must_use]
    pub const fn permissions(&self) -> &PermissionSpec {
        &self.permissions
    }

    /// Returns the execution overrides.
    #[must_use]
    pub const fn execution(&self) -> ExecutionOverrides {
        self.execution
    }

    /// Returns the declared artifacts.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactSpec] {
        &self.artifacts
    }

    /// Validates the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the id or version is blank or the
    /// executable path is not absolute.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.plugin_id.trim().is_empty() {
            return Err(ManifestError::BlankPluginId);
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError::BlankVersion {
                plugin_id: self.plugin_id.clone(),
            });
        }
        if !self.executable.is_absolute() {
            return Err(ManifestError::RelativeExecutable {
                plugin_id: self.plugin_id.clone(),
                path: self.executable.clone(),
            });
        }
        Ok(())
    }
}

/// Errors raised by manifest validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// The plugin id was empty or whitespace.
    #[error("manifest plugin id must not be blank")]
    BlankPluginId,
    /// The version was empty or whitespace.
    #[error("manifest for '{plugin_id}' has a blank version")]
    BlankVersion { plugin_id: String },
    /// The executable path was not absolute.
    #[error("manifest for '{plugin_id}' uses relative executable path {path}")]
    RelativeExecutable { plugin_id: String, path: PathBuf },
}
