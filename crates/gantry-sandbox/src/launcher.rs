//! Sandbox orchestration built on top of `birdcage`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use birdcage::process::{Child, Command};
use birdcage::{Birdcage, Exception, Sandbox as BirdcageTrait};
use tracing::warn;

use crate::env_guard::EnvGuard;
use crate::error::SandboxError;
use crate::policy::{EnvironmentPolicy, NetworkPolicy, SandboxPolicy};

const SANDBOX_TARGET: &str = "gantry_sandbox::launcher";

/// Builder for sandboxed commands.
pub type SandboxedCommand = Command;
/// Handle to a running sandboxed process.
pub type SandboxedChild = Child;

/// Launches plugin handlers inside a restrictive sandbox.
#[derive(Debug)]
pub struct SandboxLauncher {
    policy: SandboxPolicy,
}

impl SandboxLauncher {
    /// Creates a launcher with the supplied policy.
    #[must_use]
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    /// Spawns the provided command inside the configured sandbox.
    ///
    /// The command's program path must be absolute and whitelisted on the
    /// policy. Sandbox activation strips the process environment, so spawns
    /// are serialised on a process-wide lock and the environment is restored
    /// before the next spawn captures it. When the policy carries an
    /// address-space ceiling it is applied to the child from the parent
    /// immediately after the spawn, so the handler runs with the limit in
    /// force before it reads its first request.
    pub fn spawn(&self, command: SandboxedCommand) -> Result<SandboxedChild, SandboxError> {
        let program = Self::canonical_program(Path::new(command.get_program()))?;
        self.ensure_program_whitelisted(&program)?;

        let env_guard = EnvGuard::acquire();
        let exceptions = self.collect_exceptions(&program)?;

        let mut sandbox = Birdcage::new();
        for exception in exceptions {
            sandbox.add_exception(exception)?;
        }

        let child = sandbox.spawn(command)?;
        drop(env_guard);

        if let Some(memory_mb) = self.policy.memory_ceiling_mb() {
            if let Err(error) = apply_memory_ceiling(&child, memory_mb) {
                let mut child = child;
                drop(child.kill());
                drop(child.wait());
                return Err(error);
            }
        }

        Ok(child)
    }

    fn ensure_program_whitelisted(&self, program: &Path) -> Result<(), SandboxError> {
        let authorised = canonicalised_set(self.policy.executable_paths())?;
        if authorised.contains(program) {
            return Ok(());
        }
        Err(SandboxError::ExecutableNotAuthorised {
            program: program.to_path_buf(),
        })
    }

    fn collect_exceptions(&self, program: &Path) -> Result<Vec<Exception>, SandboxError> {
        let mut exceptions = Vec::new();
        let read_only = canonicalised_set(self.policy.read_only_paths())?;
        let read_write = canonicalised_set(self.policy.read_write_paths())?;
        let executables = canonicalised_set(self.policy.executable_paths())?;

        for path in self.filter_denied(read_only) {
            exceptions.push(Exception::Read(path));
        }
        for path in self.filter_denied(read_write) {
            exceptions.push(Exception::WriteAndRead(path));
        }
        for path in executables {
            exceptions.push(Exception::ExecuteAndRead(path));
        }

        exceptions.push(Exception::ExecuteAndRead(program.to_path_buf()));

        match self.policy.environment_policy() {
            EnvironmentPolicy::Isolated => {}
            EnvironmentPolicy::AllowList(keys) => {
                for key in keys {
                    exceptions.push(Exception::Environment(key.clone()));
                }
            }
            EnvironmentPolicy::InheritAll => exceptions.push(Exception::FullEnvironment),
        }

        if matches!(self.policy.network_policy(), NetworkPolicy::Allow) {
            exceptions.push(Exception::Networking);
        }

        Ok(exceptions)
    }

    /// Drops granted paths that fall under a denied prefix.
    ///
    /// Denials strictly beneath a surviving grant cannot be expressed as
    /// kernel exceptions, so they are logged rather than enforced.
    fn filter_denied(&self, paths: BTreeSet<PathBuf>) -> Vec<PathBuf> {
        let mut kept = Vec::new();
        for path in paths {
            if self.policy.is_denied(&path) {
                continue;
            }
            for denied in self.policy.denied_paths() {
                if denied.starts_with(&path) && denied != &path {
                    warn!(
                        target: SANDBOX_TARGET,
                        denied = %denied.display(),
                        granted = %path.display(),
                        "denied path lies beneath a granted root and cannot be carved out"
                    );
                }
            }
            kept.push(path);
        }
        kept
    }

    fn canonical_program(program: &Path) -> Result<PathBuf, SandboxError> {
        if !program.is_absolute() {
            return Err(SandboxError::ProgramNotAbsolute(program.to_path_buf()));
        }

        canonicalise(program)
    }
}

#[cfg(unix)]
fn apply_memory_ceiling(child: &SandboxedChild, memory_mb: u64) -> Result<(), SandboxError> {
    let pid = child.id();
    let target = libc::pid_t::try_from(pid).map_err(|_| SandboxError::MemoryLimit {
        pid,
        memory_mb,
        message: String::from("pid exceeds pid_t range"),
    })?;
    let bytes = memory_mb.saturating_mul(1024 * 1024);
    let limit = libc::rlimit {
        rlim_cur: bytes,
        rlim_max: bytes,
    };
    // prlimit targets the child by pid, so the limit lands before the handler
    // allocates in earnest.
    let result = unsafe { libc::prlimit(target, libc::RLIMIT_AS, &limit, std::ptr::null_mut()) };
    if result == 0 {
        return Ok(());
    }
    Err(SandboxError::MemoryLimit {
        pid,
        memory_mb,
        message: std::io::Error::last_os_error().to_string(),
    })
}

#[cfg(not(unix))]
fn apply_memory_ceiling(child: &SandboxedChild, memory_mb: u64) -> Result<(), SandboxError> {
    warn!(
        target: SANDBOX_TARGET,
        pid = child.id(),
        memory_mb,
        "memory ceilings are not enforced on this platform"
    );
    Ok(())
}

fn canonicalised_set(paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>, SandboxError> {
    let mut set = BTreeSet::new();
    for path in paths {
        let canonical = canonicalise(path)?;
        let _ = set.insert(canonical);
    }
    Ok(set)
}

fn canonicalise(path: &Path) -> Result<PathBuf, SandboxError> {
    if !path.exists() {
        return Err(SandboxError::MissingPath {
            path: path.to_path_buf(),
        });
    }

    fs::canonicalize(path).map_err(|source| SandboxError::CanonicalisationFailed {
        path: path.to_path_buf(),
        source,
    })
}
