//! Sandbox policy definition and builder helpers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::runtime::linux_runtime_roots;

/// Environment inheritance strategy applied to sandboxed handlers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvironmentPolicy {
    /// Remove all environment variables before launching the child.
    #[default]
    Isolated,
    /// Allow only the named environment variables to be inherited.
    AllowList(BTreeSet<String>),
    /// Inherit the full environment unchanged.
    InheritAll,
}

/// Network access policy applied to sandboxed handlers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum NetworkPolicy {
    /// Block networking by entering a separate network namespace.
    #[default]
    Deny,
    /// Permit networking in the sandboxed process.
    Allow,
}

/// Declarative description of the resources a plugin handler may access.
///
/// The policy defaults to a restrictive configuration: networking and the
/// environment are disabled, only standard Linux runtime library roots are
/// whitelisted for read access, and no address-space ceiling is set. Callers
/// translate a plugin manifest's permission block into explicit allow-lists,
/// optionally carving paths back out with [`SandboxPolicy::deny_path`].
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    read_only_paths: Vec<PathBuf>,
    read_write_paths: Vec<PathBuf>,
    denied_paths: Vec<PathBuf>,
    executable_paths: Vec<PathBuf>,
    environment: EnvironmentPolicy,
    network: NetworkPolicy,
    memory_mb: Option<u64>,
}

impl SandboxPolicy {
    /// Creates a policy with Linux runtime library paths whitelisted for
    /// read-only access.
    ///
    /// ```
    /// use gantry_sandbox::SandboxPolicy;
    ///
    /// let policy = SandboxPolicy::new()
    ///     .allow_executable("/bin/echo")
    ///     .allow_read_write_path("/tmp/gantry-handler");
    /// assert!(policy.network_policy().is_denied());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            read_only_paths: linux_runtime_roots(),
            read_write_paths: Vec::new(),
            denied_paths: Vec::new(),
            executable_paths: Vec::new(),
            environment: EnvironmentPolicy::default(),
            network: NetworkPolicy::default(),
            memory_mb: None,
        }
    }

    /// Grants execute and read access to the provided path.
    #[must_use]
    pub fn allow_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_paths.push(path.into());
        self
    }

    /// Grants read-only access to the provided path.
    #[must_use]
    pub fn allow_read_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_only_paths.push(path.into());
        self
    }

    /// Grants read-write access to the provided path.
    #[must_use]
    pub fn allow_read_write_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_write_paths.push(path.into());
        self
    }

    /// Removes access to the provided path and everything beneath it.
    ///
    /// Denials win over grants: an allowed path at or beneath a denied prefix
    /// is dropped when exceptions are collected. A denial strictly beneath a
    /// surviving grant cannot be carved out of the kernel policy and is
    /// reported as a launch-time warning instead.
    #[must_use]
    pub fn deny_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.denied_paths.push(path.into());
        self
    }

    /// Whitelists an environment variable for inheritance.
    ///
    /// When the policy is already [`EnvironmentPolicy::InheritAll`] this is a
    /// no-op because the full environment is already permitted.
    #[must_use]
    pub fn allow_environment_variable(mut self, key: impl Into<String>) -> Self {
        self.environment = self.environment.clone().with_allowed(key.into());
        self
    }

    /// Inherit all environment variables from the parent process.
    #[must_use]
    pub fn allow_full_environment(mut self) -> Self {
        self.environment = EnvironmentPolicy::InheritAll;
        self
    }

    /// Allows the sandboxed process to use the host network namespace.
    #[must_use]
    pub fn allow_networking(mut self) -> Self {
        self.network = NetworkPolicy::Allow;
        self
    }

    /// Caps the child's address space at the provided size in mebibytes.
    #[must_use]
    pub fn memory_limit_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    /// Returns true when the provided path falls under a denied prefix.
    pub(crate) fn is_denied(&self, path: &Path) -> bool {
        self.denied_paths
            .iter()
            .any(|denied| path.starts_with(denied))
    }

    pub(crate) fn read_only_paths(&self) -> &[PathBuf] {
        &self.read_only_paths
    }

    pub(crate) fn read_write_paths(&self) -> &[PathBuf] {
        &self.read_write_paths
    }

    pub(crate) fn denied_paths(&self) -> &[PathBuf] {
        &self.denied_paths
    }

    pub(crate) fn executable_paths(&self) -> &[PathBuf] {
        &self.executable_paths
    }

    pub(crate) fn environment_policy(&self) -> &EnvironmentPolicy {
        &self.environment
    }

    /// Returns the network policy.
    #[must_use]
    pub fn network_policy(&self) -> NetworkPolicy {
        self.network
    }

    /// Returns the configured address-space ceiling, if any.
    #[must_use]
    pub fn memory_ceiling_mb(&self) -> Option<u64> {
        self.memory_mb
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkPolicy {
    /// Returns true when networking is denied.
    #[must_use]
    pub fn is_denied(self) -> bool {
        matches!(self, Self::Deny)
    }
}

impl EnvironmentPolicy {
    pub(crate) fn with_allowed(self, key: String) -> Self {
        match self {
            Self::Isolated => {
                let mut allow = BTreeSet::new();
                allow.insert(key);
                Self::AllowList(allow)
            }
            Self::AllowList(mut keys) => {
                let _ = keys.insert(key);
                Self::AllowList(keys)
            }
            Self::InheritAll => Self::InheritAll,
        }
    }
}
