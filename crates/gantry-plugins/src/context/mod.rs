//! Execution contexts and the invocation chain limiter.
//!
//! One [`ChainState`] is shared by every invocation descending from a root
//! request. Depth is tracked per branch; fan-out, the visited-key cycle
//! guard, and the wall-clock budget live behind one shared handle so a deep
//! descendant observes the time its ancestors already consumed. The budget
//! is never reset per hop: [`ChainState::remaining`] is a live function of
//! elapsed time against the original chain budget.
//!
//! Admission happens before any broker slot is acquired, so a rejected
//! nested call wastes no quota.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use gantry_config::{ChainSettings, ExecutionSettings};

/// Budgets applied to one invocation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLimits {
    /// Maximum nesting depth.
    pub max_depth: u32,
    /// Maximum number of nested invocations across the whole chain.
    pub max_fan_out: u32,
    /// Total wall-clock budget shared by the whole chain.
    pub max_chain_time: Duration,
}

impl ChainLimits {
    /// Builds limits from the configured chain and execution settings.
    #[must_use]
    pub fn from_settings(chain: &ChainSettings, execution: &ExecutionSettings) -> Self {
        Self {
            max_depth: chain.max_depth,
            max_fan_out: chain.max_fan_out,
            max_chain_time: Duration::from_millis(chain.chain_time_ms(execution)),
        }
    }
}

impl Default for ChainLimits {
    fn default() -> Self {
        Self::from_settings(&ChainSettings::default(), &ExecutionSettings::default())
    }
}

#[derive(Debug)]
struct ChainShared {
    started: Instant,
    limits: ChainLimits,
    inner: Mutex<ChainInner>,
}

#[derive(Debug, Default)]
struct ChainInner {
    fan_out: u32,
    visited: HashSet<String>,
}

impl ChainShared {
    fn inner(&self) -> MutexGuard<'_, ChainInner> {
        // A poisoned chain lock only means a panicking thread held it; the
        // counters remain usable.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Per-branch view of a shared invocation chain.
///
/// Cloning shares the underlying chain; [`ChainState::admit`] produces the
/// deepened state handed to a nested invocation.
#[derive(Debug, Clone)]
pub struct ChainState {
    depth: u32,
    shared: Arc<ChainShared>,
}

impl ChainState {
    /// Starts a new chain for a root request.
    #[must_use]
    pub fn root(limits: ChainLimits) -> Self {
        Self {
            depth: 0,
            shared: Arc::new(ChainShared {
                started: Instant::now(),
                limits,
                inner: Mutex::new(ChainInner::default()),
            }),
        }
    }

    /// Returns the nesting depth of this branch.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns the number of nested invocations admitted so far.
    #[must_use]
    pub fn fan_out(&self) -> u32 {
        self.shared.inner().fan_out
    }

    /// Returns the chain budget left, shrinking monotonically with
    /// wall-clock time since the chain started.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.shared
            .limits
            .max_chain_time
            .saturating_sub(self.shared.started.elapsed())
    }

    /// Admits one nested invocation, returning the deepened chain state.
    ///
    /// Admission is serialised on the chain lock so concurrent branches
    /// cannot both claim the final fan-out slot.
    ///
    /// # Errors
    ///
    /// Returns [`ChainViolation`] when the depth or fan-out limit is
    /// reached, the shared budget is exhausted, or the invocation key was
    /// already visited in this chain.
    pub fn admit(&self, invocation_key: &str) -> Result<Self, ChainViolation> {
        let limits = self.shared.limits;
        if self.depth >= limits.max_depth {
            return Err(ChainViolation::DepthExceeded {
                depth: self.depth,
                max_depth: limits.max_depth,
            });
        }
        if self.remaining().is_zero() {
            return Err(ChainViolation::BudgetExhausted {
                max_chain_time: limits.max_chain_time,
            });
        }

        let mut inner = self.shared.inner();
        if inner.fan_out >= limits.max_fan_out {
            return Err(ChainViolation::FanOutExceeded {
                fan_out: inner.fan_out,
                max_fan_out: limits.max_fan_out,
            });
        }
        if !inner.visited.insert(invocation_key.to_owned()) {
            return Err(ChainViolation::CycleDetected {
                invocation_key: invocation_key.to_owned(),
            });
        }
        inner.fan_out += 1;
        drop(inner);

        Ok(Self {
            depth: self.depth + 1,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Reasons a nested invocation was refused admission to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainViolation {
    /// The branch reached the maximum nesting depth.
    #[error("chain depth {depth} reached the limit of {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },
    /// The chain spawned its maximum number of nested invocations.
    #[error("chain fan-out {fan_out} reached the limit of {max_fan_out}")]
    FanOutExceeded { fan_out: u32, max_fan_out: u32 },
    /// The shared wall-clock budget is spent.
    #[error("chain budget of {max_chain_time:?} is exhausted")]
    BudgetExhausted { max_chain_time: Duration },
    /// The invocation key was already visited in this chain.
    #[error("invocation '{invocation_key}' already visited in this chain")]
    CycleDetected { invocation_key: String },
}

/// Per-request execution context.
///
/// Created for every external request and discarded after the result is
/// returned; never persisted. The trace id is inherited across hops while
/// each hop receives a fresh span id.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    plugin_id: String,
    plugin_version: String,
    tenant_id: String,
    request_id: String,
    chain: ChainState,
}

impl ExecutionContext {
    /// Creates the context for a root request, starting a fresh chain.
    #[must_use]
    pub fn root(
        plugin_id: impl Into<String>,
        plugin_version: impl Into<String>,
        tenant_id: impl Into<String>,
        limits: ChainLimits,
    ) -> Self {
        Self::root_with_trace(
            Uuid::new_v4().to_string(),
            plugin_id,
            plugin_version,
            tenant_id,
            limits,
        )
    }

    /// Creates a root context under a trace id minted by the caller.
    ///
    /// The host mints the trace id at request entry so events emitted before
    /// a context exists still correlate with the execution.
    #[must_use]
    pub fn root_with_trace(
        trace_id: impl Into<String>,
        plugin_id: impl Into<String>,
        plugin_version: impl Into<String>,
        tenant_id: impl Into<String>,
        limits: ChainLimits,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            plugin_id: plugin_id.into(),
            plugin_version: plugin_version.into(),
            tenant_id: tenant_id.into(),
            request_id: Uuid::new_v4().to_string(),
            chain: ChainState::root(limits),
        }
    }

    /// Creates the context for a nested invocation.
    ///
    /// The caller must have obtained `admitted` from
    /// [`ChainState::admit`] on this context's chain.
    #[must_use]
    pub fn child(
        &self,
        plugin_id: impl Into<String>,
        plugin_version: impl Into<String>,
        admitted: ChainState,
    ) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            plugin_id: plugin_id.into(),
            plugin_version: plugin_version.into(),
            tenant_id: self.tenant_id.clone(),
            request_id: Uuid::new_v4().to_string(),
            chain: admitted,
        }
    }

    /// Returns the trace id shared by the whole chain.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        self.trace_id.as_str()
    }

    /// Returns this hop's span id.
    #[must_use]
    pub fn span_id(&self) -> &str {
        self.span_id.as_str()
    }

    /// Returns the parent hop's span id, when this is a nested invocation.
    #[must_use]
    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    /// Returns the executing plugin id.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Returns the executing plugin version.
    #[must_use]
    pub fn plugin_version(&self) -> &str {
        self.plugin_version.as_str()
    }

    /// Returns the tenant the request executes under.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        self.tenant_id.as_str()
    }

    /// Returns the request id, unique per hop.
    #[must_use]
    pub fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    /// Returns the chain state threaded through nested invocations.
    #[must_use]
    pub const fn chain(&self) -> &ChainState {
        &self.chain
    }

    /// Produces the serialisable view handed to sandboxed handlers.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            plugin_id: self.plugin_id.clone(),
            plugin_version: self.plugin_version.clone(),
            tenant_id: self.tenant_id.clone(),
            request_id: self.request_id.clone(),
            depth: self.chain.depth(),
            remaining_ms: u64::try_from(self.chain.remaining().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Serialisable view of an [`ExecutionContext`] for handler processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub plugin_id: String,
    pub plugin_version: String,
    pub tenant_id: String,
    pub request_id: String,
    pub depth: u32,
    pub remaining_ms: u64,
}
