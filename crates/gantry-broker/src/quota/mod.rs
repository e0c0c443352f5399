//! Resource types and tenant quota arithmetic.

use serde::{Deserialize, Serialize};

use gantry_config::QuotaSettings;

/// Resource categories the broker limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A running workflow instance.
    Workflow,
    /// A running background job.
    Job,
    /// An in-flight LLM completion request.
    Llm,
    /// An in-flight embedding request.
    Embedding,
    /// An in-flight generic external API request.
    Api,
}

impl ResourceType {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Job => "job",
            Self::Llm => "llm",
            Self::Embedding => "embedding",
            Self::Api => "api",
        }
    }

    /// Returns the quota pool this resource type draws from.
    ///
    /// `llm`, `embedding`, and `api` deliberately share one pool: they are
    /// all outbound platform requests capped by the same quota field. A
    /// future split only needs to touch this mapping.
    #[must_use]
    pub const fn pool(self) -> QuotaPool {
        match self {
            Self::Workflow => QuotaPool::Workflow,
            Self::Job => QuotaPool::Job,
            Self::Llm | Self::Embedding | Self::Api => QuotaPool::SharedApi,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accounting pools the broker counts slots against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaPool {
    /// Concurrent workflows.
    Workflow,
    /// Concurrent jobs.
    Job,
    /// Shared pool for llm, embedding, and api requests.
    SharedApi,
}

/// Effective quotas for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuotas {
    /// Concurrent workflow slots.
    pub max_concurrent_workflows: u32,
    /// Concurrent job slots.
    pub max_concurrent_jobs: u32,
    /// Shared slot pool for llm, embedding, and api requests.
    pub api_requests_per_minute: u32,
}

impl TenantQuotas {
    /// Returns the cap for the pool a resource type draws from.
    #[must_use]
    pub const fn limit_for(&self, resource_type: ResourceType) -> u32 {
        match resource_type.pool() {
            QuotaPool::Workflow => self.max_concurrent_workflows,
            QuotaPool::Job => self.max_concurrent_jobs,
            QuotaPool::SharedApi => self.api_requests_per_minute,
        }
    }

    /// Applies a partial override on top of these quotas.
    #[must_use]
    pub fn merged(&self, overrides: &QuotaOverrides) -> Self {
        Self {
            max_concurrent_workflows: overrides
                .max_concurrent_workflows
                .unwrap_or(self.max_concurrent_workflows),
            max_concurrent_jobs: overrides
                .max_concurrent_jobs
                .unwrap_or(self.max_concurrent_jobs),
            api_requests_per_minute: overrides
                .api_requests_per_minute
                .unwrap_or(self.api_requests_per_minute),
        }
    }
}

impl From<QuotaSettings> for TenantQuotas {
    fn from(settings: QuotaSettings) -> Self {
        Self {
            max_concurrent_workflows: settings.max_concurrent_workflows,
            max_concurrent_jobs: settings.max_concurrent_jobs,
            api_requests_per_minute: settings.api_requests_per_minute,
        }
    }
}

/// Partial per-tenant quota override, merged onto the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaOverrides {
    pub max_concurrent_workflows: Option<u32>,
    pub max_concurrent_jobs: Option<u32>,
    pub api_requests_per_minute: Option<u32>,
}

impl QuotaOverrides {
    /// Folds another override on top of this one, keeping unset fields.
    #[must_use]
    pub fn overlaid(&self, other: &Self) -> Self {
        Self {
            max_concurrent_workflows: other
                .max_concurrent_workflows
                .or(self.max_concurrent_workflows),
            max_concurrent_jobs: other.max_concurrent_jobs.or(self.max_concurrent_jobs),
            api_requests_per_minute: other
                .api_requests_per_minute
                .or(self.api_requests_per_minute),
        }
    }
}
