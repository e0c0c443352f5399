//! Serialises sandbox spawns and repairs the daemon environment afterwards.
//!
//! `birdcage` strips the process environment while activating a sandbox, so
//! every spawn is a read-modify-write of process-wide state. The daemon
//! spawns handlers from many threads; two overlapping spawns would snapshot
//! and restore each other's stripped views and lose variables for good. The
//! guard therefore couples a process-wide lock with the snapshot: exactly
//! one spawn sits between capture and restore at a time, and the snapshot it
//! captures is always the daemon's own environment.

use std::collections::{HashMap, HashSet};
use std::env;
use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, PoisonError};

static SPAWN_ENV_LOCK: Mutex<()> = Mutex::new(());

/// Holds the spawn lock and the environment snapshot taken under it.
///
/// Dropping the guard restores the snapshot first and releases the lock
/// after, so the next spawn captures a repaired environment.
#[derive(Debug)]
pub(crate) struct EnvGuard {
    original: HashMap<OsString, OsString>,
    _serial: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Takes the process-wide spawn lock, then snapshots the environment.
    ///
    /// Blocks until any in-flight spawn has restored its snapshot.
    #[must_use]
    pub(crate) fn acquire() -> Self {
        // A poisoned lock means a spawn panicked mid-flight; its snapshot
        // was restored by the unwinding guard, so the lock stays usable.
        let serial = SPAWN_ENV_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self {
            original: env::vars_os().collect(),
            _serial: serial,
        }
    }

    fn restore(&self) {
        let current: HashMap<OsString, OsString> = env::vars_os().collect();
        let expected_keys: HashSet<&OsString> = self.original.keys().collect();

        // Remove variables introduced while the guard was active. Mutation
        // is unsafe in edition 2024; the spawn lock held by this guard keeps
        // other guards out of the critical section.
        for key in current.keys() {
            if !expected_keys.contains(key) {
                unsafe { env::remove_var(key) };
            }
        }

        for (key, value) in &self.original {
            unsafe { env::set_var(key, value) };
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // Runs while `_serial` is still held; the lock releases afterwards.
        self.restore();
    }
}
