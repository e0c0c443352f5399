//! Unit tests for the plugin registry.

use std::path::PathBuf;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::manifest::ManifestError;

fn make_manifest(plugin_id: &str) -> ExecutionManifest {
    ExecutionManifest::new(
        plugin_id,
        "1.0.0",
        PathBuf::from(format!("/usr/libexec/{plugin_id}")),
    )
}

#[fixture]
fn schemas() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register("greet.input@1", &json!({"type": "object"}))
        .expect("register schema");
    registry
}

#[test]
fn new_registry_is_empty() {
    let registry = PluginRegistry::new();
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
}

#[rstest]
fn register_and_get(schemas: SchemaRegistry) {
    let mut registry = PluginRegistry::new();
    registry
        .register(make_manifest("greeter"), &schemas)
        .expect("register");
    assert_eq!(registry.len(), 1);
    let manifest = registry.get("greeter").expect("get greeter");
    assert_eq!(manifest.plugin_id(), "greeter");
}

#[rstest]
fn register_rejects_duplicate(schemas: SchemaRegistry) {
    let mut registry = PluginRegistry::new();
    registry
        .register(make_manifest("greeter"), &schemas)
        .expect("first register");
    let error = registry
        .register(make_manifest("greeter"), &schemas)
        .expect_err("duplicate should fail");
    assert!(matches!(error, RegistryError::Duplicate { .. }));
}

#[rstest]
fn register_rejects_invalid_manifest(schemas: SchemaRegistry) {
    let mut registry = PluginRegistry::new();
    let error = registry
        .register(make_manifest("  "), &schemas)
        .expect_err("should reject blank id");
    assert_eq!(error, RegistryError::Manifest(ManifestError::BlankPluginId));
}

#[rstest]
fn register_accepts_known_schema_reference(schemas: SchemaRegistry) {
    let mut registry = PluginRegistry::new();
    let manifest = make_manifest("greeter").with_input_schema("greet.input@1");
    assert!(registry.register(manifest, &schemas).is_ok());
}

#[rstest]
fn register_rejects_unknown_schema_reference(schemas: SchemaRegistry) {
    let mut registry = PluginRegistry::new();
    let manifest = make_manifest("greeter").with_output_schema("never-registered@1");
    let error = registry
        .register(manifest, &schemas)
        .expect_err("unknown schema should fail");
    assert!(matches!(
        error,
        RegistryError::UnknownSchema { reference, .. } if reference == "never-registered@1"
    ));
}

#[rstest]
fn get_returns_none_for_missing(schemas: SchemaRegistry) {
    let mut registry = PluginRegistry::new();
    registry
        .register(make_manifest("greeter"), &schemas)
        .expect("register");
    assert!(registry.get("nonexistent").is_none());
}
