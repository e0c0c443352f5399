//! Schema registry and validation for handler payloads.
//!
//! Schemas are compiled exactly once, when a plugin registers, and looked
//! up by a stable reference string at execution time. The pipeline invokes
//! validation twice per execution: on the input before dispatch and on the
//! output after a successful handler run. Each report is tagged with the
//! side that failed so the envelope can distinguish the two.

use std::collections::HashMap;
use std::fmt;

use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which validation pass produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSide {
    /// Validation of the caller-supplied input, before dispatch.
    Input,
    /// Validation of the handler output, after a successful run.
    Output,
}

impl fmt::Display for SchemaSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// Result of validating a payload against a declared schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    /// `true` when the payload conformed (or no schema was declared).
    pub ok: bool,
    /// The side that was validated.
    pub side: SchemaSide,
    /// Human-readable validation errors, empty on success.
    pub errors: Vec<String>,
}

impl SchemaReport {
    fn pass(side: SchemaSide) -> Self {
        Self {
            ok: true,
            side,
            errors: Vec::new(),
        }
    }

    fn fail(side: SchemaSide, errors: Vec<String>) -> Self {
        Self {
            ok: false,
            side,
            errors,
        }
    }
}

/// Registry of schemas compiled at plugin-registration time.
///
/// # Example
///
/// ```
/// use gantry_plugins::schema::{SchemaRegistry, SchemaSide};
///
/// let mut registry = SchemaRegistry::new();
/// registry
///     .register(
///         "greet.input@1",
///         &serde_json::json!({
///             "type": "object",
///             "properties": {"name": {"type": "string"}},
///             "required": ["name"],
///         }),
///     )
///     .expect("schema compiles");
///
/// let report = registry.validate("greet.input@1", &serde_json::json!({}), SchemaSide::Input);
/// assert!(!report.ok);
/// ```
#[derive(Default)]
pub struct SchemaRegistry {
    compiled: HashMap<String, JSONSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and stores a schema under the given reference.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Duplicate`] when the reference is taken and
    /// [`SchemaError::Compile`] when the document is not a valid JSON
    /// Schema.
    pub fn register(
        &mut self,
        reference: impl Into<String>,
        schema: &serde_json::Value,
    ) -> Result<(), SchemaError> {
        let reference = reference.into();
        if self.compiled.contains_key(&reference) {
            return Err(SchemaError::Duplicate { reference });
        }
        let compiled = JSONSchema::compile(schema).map_err(|error| SchemaError::Compile {
            reference: reference.clone(),
            message: error.to_string(),
        })?;
        self.compiled.insert(reference, compiled);
        Ok(())
    }

    /// Returns `true` when a schema is registered under the reference.
    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        self.compiled.contains_key(reference)
    }

    /// Validates a payload against a registered schema.
    ///
    /// An unknown reference fails validation rather than passing silently:
    /// a manifest declaring a schema that was never registered is a
    /// registration bug, not a permissive contract.
    #[must_use]
    pub fn validate(
        &self,
        reference: &str,
        data: &serde_json::Value,
        side: SchemaSide,
    ) -> SchemaReport {
        let Some(schema) = self.compiled.get(reference) else {
            return SchemaReport::fail(
                side,
                vec![format!("schema '{reference}' is not registered")],
            );
        };
        match schema.validate(data) {
            Ok(()) => SchemaReport::pass(side),
            Err(errors) => {
                SchemaReport::fail(side, errors.map(|error| error.to_string()).collect())
            }
        }
    }

    /// Validates against an optional reference; absent means always ok.
    #[must_use]
    pub fn validate_declared(
        &self,
        reference: Option<&str>,
        data: &serde_json::Value,
        side: SchemaSide,
    ) -> SchemaReport {
        reference.map_or_else(
            || SchemaReport::pass(side),
            |schema_ref| self.validate(schema_ref, data, side),
        )
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.compiled.len())
            .finish()
    }
}

/// Errors raised while registering schemas.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A schema is already registered under the reference.
    #[error("schema '{reference}' is already registered")]
    Duplicate { reference: String },
    /// The document is not a valid JSON Schema.
    #[error("schema '{reference}' failed to compile: {message}")]
    Compile { reference: String, message: String },
}
