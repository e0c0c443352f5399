//! Typed call stubs layered over an adapter connection.
//!
//! A [`RemoteAdapter`] binds a connection to one adapter role and a caller
//! context, so call sites pass only a method and arguments. The
//! [`EmbeddingsProxy`] adds a typed surface for the embeddings role and
//! memoises the model's dimensionality after the first fetch.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::client::{AdapterConnection, CallError};
use crate::protocol::{AdapterName, CallContext};

/// Errors raised by typed proxy calls.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The underlying adapter call failed.
    #[error(transparent)]
    Call(#[from] CallError),
    /// The adapter returned a value the proxy cannot interpret.
    #[error("adapter method {method} returned an unexpected shape: {detail}")]
    UnexpectedShape { method: String, detail: String },
    /// `dimensions_cached` was read before the first fetch.
    #[error("embedding dimensionality has not been fetched yet; call dimensions() first")]
    DimensionsNotFetched,
}

/// Generic stub for one adapter role over one connection.
pub struct RemoteAdapter {
    connection: Arc<AdapterConnection>,
    adapter: AdapterName,
    context: Option<CallContext>,
    timeout: Duration,
}

impl RemoteAdapter {
    /// Builds a stub for the given role.
    #[must_use]
    pub fn new(
        connection: Arc<AdapterConnection>,
        adapter: AdapterName,
        timeout: Duration,
    ) -> Self {
        Self {
            connection,
            adapter,
            context: None,
            timeout,
        }
    }

    /// Attaches a caller context to every call issued through the stub.
    #[must_use]
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Issues a call against the bound role.
    pub fn call(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CallError> {
        self.connection
            .call(self.adapter, method, args, self.context.clone(), self.timeout)
    }

    /// Returns the bound adapter role.
    #[must_use]
    pub const fn adapter(&self) -> AdapterName {
        self.adapter
    }
}

/// Typed surface for the embeddings adapter.
pub struct EmbeddingsProxy {
    remote: RemoteAdapter,
    dimensions: OnceLock<usize>,
}

impl EmbeddingsProxy {
    /// Builds a proxy over a connection.
    #[must_use]
    pub fn new(connection: Arc<AdapterConnection>, timeout: Duration) -> Self {
        Self {
            remote: RemoteAdapter::new(connection, AdapterName::Embeddings, timeout),
            dimensions: OnceLock::new(),
        }
    }

    /// Attaches a caller context to every call issued through the proxy.
    #[must_use]
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.remote = self.remote.with_context(context);
        self
    }

    /// Embeds a single text.
    pub fn embed(&self, text: &str) -> Result<Vec<f64>, ProxyError> {
        let result = self.remote.call("embed", vec![json!(text)])?;
        parse_vector("embed", &result)
    }

    /// Embeds a batch of texts, preserving order.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, ProxyError> {
        let result = self.remote.call("embedBatch", vec![json!(texts)])?;
        let rows = result
            .as_array()
            .ok_or_else(|| ProxyError::UnexpectedShape {
                method: String::from("embedBatch"),
                detail: String::from("expected an array of vectors"),
            })?;
        let mut vectors = Vec::with_capacity(rows.len());
        for row in rows {
            vectors.push(parse_vector("embedBatch", row)?);
        }
        Ok(vectors)
    }

    /// Returns the model's dimensionality, fetching it from the adapter on
    /// first use and memoising the answer.
    pub fn dimensions(&self) -> Result<usize, ProxyError> {
        if let Some(cached) = self.dimensions.get() {
            return Ok(*cached);
        }
        let result = self.remote.call("dimensions", Vec::new())?;
        let fetched = result
            .as_u64()
            .and_then(|raw| usize::try_from(raw).ok())
            .ok_or_else(|| ProxyError::UnexpectedShape {
                method: String::from("dimensions"),
                detail: String::from("expected a non-negative integer"),
            })?;
        Ok(*self.dimensions.get_or_init(|| fetched))
    }

    /// Returns the memoised dimensionality without touching the adapter.
    ///
    /// Reading before the first [`dimensions`](Self::dimensions) fetch is a
    /// programming error and fails loudly rather than guessing a value.
    pub fn dimensions_cached(&self) -> Result<usize, ProxyError> {
        self.dimensions
            .get()
            .copied()
            .ok_or(ProxyError::DimensionsNotFetched)
    }
}

fn parse_vector(method: &str, value: &serde_json::Value) -> Result<Vec<f64>, ProxyError> {
    let entries = value
        .as_array()
        .ok_or_else(|| ProxyError::UnexpectedShape {
            method: method.to_owned(),
            detail: String::from("expected an array of numbers"),
        })?;
    let mut vector = Vec::with_capacity(entries.len());
    for entry in entries {
        let number = entry.as_f64().ok_or_else(|| ProxyError::UnexpectedShape {
            method: method.to_owned(),
            detail: format!("non-numeric vector entry: {entry}"),
        })?;
        vector.push(number);
    }
    Ok(vector)
}

#[cfg(test)]
mod tests;
