//! Plugin registry: validated manifest storage and lookup.
//!
//! Registration is the moment schemas are resolved: a manifest declaring a
//! schema reference that is absent from the [`SchemaRegistry`] is rejected
//! here, so no execution ever performs dynamic schema resolution.

use std::collections::HashMap;

use crate::manifest::{ExecutionManifest, ManifestError};
use crate::schema::SchemaRegistry;

/// Registry of execution manifests keyed by plugin id.
///
/// # Example
///
/// ```
/// use gantry_plugins::{ExecutionManifest, PluginRegistry, SchemaRegistry};
/// use std::path::PathBuf;
///
/// let schemas = SchemaRegistry::new();
/// let mut registry = PluginRegistry::new();
/// let manifest =
///     ExecutionManifest::new("greeter", "1.0.0", PathBuf::from("/usr/libexec/greeter"));
/// registry.register(manifest, &schemas).expect("registration succeeds");
/// assert!(registry.get("greeter").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    manifests: HashMap<String, ExecutionManifest>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a manifest after validating it and its schema references.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when manifest validation fails, a plugin
    /// with the same id is already registered, or a declared schema
    /// reference was never registered.
    pub fn register(
        &mut self,
        manifest: ExecutionManifest,
        schemas: &SchemaRegistry,
    ) -> Result<(), RegistryError> {
        manifest.validate()?;
        let plugin_id = manifest.plugin_id().to_owned();
        if self.manifests.contains_key(&plugin_id) {
            return Err(RegistryError::Duplicate { plugin_id });
        }
        for reference in [manifest.input_schema(), manifest.output_schema()]
            .into_iter()
            .flatten()
        {
            if !schemas.contains(reference) {
                return Err(RegistryError::UnknownSchema {
                    plugin_id,
                    reference: reference.to_owned(),
                });
            }
        }
        self.manifests.insert(plugin_id, manifest);
        Ok(())
    }

    /// Looks up a manifest by plugin id.
    #[must_use]
    pub fn get(&self, plugin_id: &str) -> Option<&ExecutionManifest> {
        self.manifests.get(plugin_id)
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Returns `true` when no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

/// Errors raised while registering plugins.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The manifest failed validation.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// A plugin with the same id is already registered.
    #[error("plugin '{plugin_id}' is already registered")]
    Duplicate { plugin_id: String },
    /// The manifest declared a schema that was never registered.
    #[error("plugin '{plugin_id}' declares unregistered schema '{reference}'")]
    UnknownSchema {
        plugin_id: String,
        reference: String,
    },
}

#[cfg(test)]
mod tests;
