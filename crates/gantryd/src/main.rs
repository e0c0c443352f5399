use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use gantry_config::Config;
use gantry_plugins::{PluginRegistry, SchemaRegistry};

fn load_config() -> Option<Config> {
    match std::env::var_os("GANTRY_CONFIG") {
        Some(path) => {
            let raw = std::fs::read_to_string(path).ok()?;
            serde_json::from_str(&raw).ok()
        }
        None => Some(Config::default()),
    }
}

fn load_schemas() -> Option<SchemaRegistry> {
    let mut schemas = SchemaRegistry::new();
    let Some(dir) = std::env::var_os("GANTRY_SCHEMA_DIR") else {
        return Some(schemas);
    };
    for entry in std::fs::read_dir(dir).ok()? {
        let path = entry.ok()?.path();
        if path.extension().is_some_and(|extension| extension == "json") {
            let reference = path.file_stem()?.to_str()?.to_owned();
            let raw = std::fs::read_to_string(&path).ok()?;
            let schema = serde_json::from_str(&raw).ok()?;
            schemas.register(reference, &schema).ok()?;
        }
    }
    Some(schemas)
}

fn load_plugins(schemas: &SchemaRegistry) -> Option<PluginRegistry> {
    let mut plugins = PluginRegistry::new();
    let Some(dir) = std::env::var_os("GANTRY_MANIFEST_DIR") else {
        return Some(plugins);
    };
    for entry in std::fs::read_dir(dir).ok()? {
        let path = entry.ok()?.path();
        if path.extension().is_some_and(|extension| extension == "json") {
            let raw = std::fs::read_to_string(&path).ok()?;
            let manifest = serde_json::from_str(&raw).ok()?;
            plugins.register(manifest, schemas).ok()?;
        }
    }
    Some(plugins)
}

fn artifact_root() -> PathBuf {
    std::env::var_os("GANTRY_ARTIFACT_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/lib/gantry/artifacts"))
}

fn main() -> ExitCode {
    let Some(config) = load_config() else {
        return ExitCode::FAILURE;
    };
    let Some(schemas) = load_schemas() else {
        return ExitCode::FAILURE;
    };
    let Some(plugins) = load_plugins(&schemas) else {
        return ExitCode::FAILURE;
    };
    match gantryd::bootstrap::bootstrap(config, plugins, schemas, artifact_root()) {
        Ok(runtime) => {
            // The listener threads serve requests; main only keeps the
            // runtime alive.
            let _runtime = runtime;
            loop {
                thread::park();
            }
        }
        Err(_) => ExitCode::FAILURE,
    }
}
