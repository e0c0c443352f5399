//! Slot acquisition, release, availability, and expiry sweeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::quota::{QuotaOverrides, QuotaPool, ResourceType, TenantQuotas};

/// Tracing target for broker operations.
const BROKER_TARGET: &str = "gantry_broker::broker";

/// Granularity at which the sweeper thread re-checks its shutdown flag.
const SWEEP_POLL: Duration = Duration::from_millis(100);

/// One unit of permitted concurrent resource usage.
///
/// Owned exclusively by the broker; the handle returned to callers is a
/// claim ticket whose release is idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSlot {
    id: Uuid,
    resource_type: ResourceType,
    tenant_id: String,
    acquired_at: Instant,
    expires_at: Option<Instant>,
}

impl ResourceSlot {
    /// Returns the slot identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the resource type the slot was acquired for.
    #[must_use]
    pub const fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Returns the owning tenant.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        self.tenant_id.as_str()
    }

    /// Returns when the slot was acquired.
    #[must_use]
    pub const fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Returns the leak-recovery deadline, when one was set.
    #[must_use]
    pub const fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }
}

/// Snapshot of pool occupancy for one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    /// Configured cap.
    pub total: u32,
    /// Slots currently held.
    pub used: u32,
    /// Slots still acquirable.
    pub available: u32,
    /// Always zero: this in-memory broker does not queue waiters.
    pub queue_length: u32,
}

/// Best-effort mirror publishing per-tenant overrides to an external cache.
///
/// Mirroring exists for cross-process visibility only; enforcement counts
/// stay process-local. Publish failures are logged and swallowed.
pub trait QuotaMirror: Send + Sync {
    /// Publishes the tenant's effective quotas.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] when the external cache rejects the write.
    fn publish(&self, tenant_id: &str, quotas: &TenantQuotas) -> Result<(), MirrorError>;
}

/// Failure reported by a [`QuotaMirror`] implementation.
#[derive(Debug, Error)]
#[error("quota mirror publish failed: {message}")]
pub struct MirrorError {
    /// Description of the failure.
    pub message: String,
}

#[derive(Debug)]
struct SlotRecord {
    resource_type: ResourceType,
    tenant_id: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct BrokerState {
    overrides: HashMap<String, QuotaOverrides>,
    slots: HashMap<Uuid, SlotRecord>,
    used: HashMap<(String, QuotaPool), u32>,
}

impl BrokerState {
    fn decrement(&mut self, tenant_id: &str, pool: QuotaPool) {
        let key = (tenant_id.to_owned(), pool);
        if let Some(count) = self.used.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.used.remove(&key);
            }
        }
    }
}

/// Per-tenant, per-resource-type slot broker.
///
/// All mutations happen under one lock, so a check-then-acquire sequence is
/// race-free within this process. Nothing here synchronises across
/// processes; that is an accepted limitation, not a bug.
///
/// # Example
///
/// ```
/// use gantry_broker::{QuotaOverrides, ResourceBroker, ResourceType, TenantQuotas};
///
/// let broker = ResourceBroker::new(TenantQuotas {
///     max_concurrent_workflows: 10,
///     max_concurrent_jobs: 1,
///     api_requests_per_minute: 60,
/// });
/// let slot = broker
///     .acquire_slot(ResourceType::Job, "tenant-a", None)
///     .expect("first job slot");
/// assert!(broker.acquire_slot(ResourceType::Job, "tenant-a", None).is_none());
/// broker.release_slot(&slot);
/// ```
pub struct ResourceBroker {
    defaults: TenantQuotas,
    state: Mutex<BrokerState>,
    mirror: Option<Arc<dyn QuotaMirror>>,
}

impl ResourceBroker {
    /// Creates a broker with the given default quotas and no mirror.
    #[must_use]
    pub fn new(defaults: TenantQuotas) -> Self {
        Self {
            defaults,
            state: Mutex::new(BrokerState::default()),
            mirror: None,
        }
    }

    /// Attaches a quota mirror for best-effort override publication.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn QuotaMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        // Slot tables stay consistent even if a holder panicked.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Acquires one slot, or returns `None` on quota exhaustion.
    ///
    /// There is no queueing and no backoff: the caller decides whether and
    /// how to retry. `ttl` sets the slot's expiry for leak recovery by the
    /// sweeper; it is not a wait-for-availability timeout.
    #[must_use]
    pub fn acquire_slot(
        &self,
        resource_type: ResourceType,
        tenant_id: &str,
        ttl: Option<Duration>,
    ) -> Option<ResourceSlot> {
        let pool = resource_type.pool();
        let mut state = self.state();
        let limit = self.effective_quotas(&state, tenant_id).limit_for(resource_type);
        let used = state
            .used
            .get(&(tenant_id.to_owned(), pool))
            .copied()
            .unwrap_or(0);
        if used >= limit {
            debug!(
                target: BROKER_TARGET,
                tenant = tenant_id,
                resource = %resource_type,
                used,
                limit,
                "slot acquisition refused: quota exhausted"
            );
            return None;
        }

        let acquired_at = Instant::now();
        let expires_at = ttl.map(|duration| acquired_at + duration);
        let slot = ResourceSlot {
            id: Uuid::new_v4(),
            resource_type,
            tenant_id: tenant_id.to_owned(),
            acquired_at,
            expires_at,
        };
        state.slots.insert(
            slot.id,
            SlotRecord {
                resource_type,
                tenant_id: tenant_id.to_owned(),
                expires_at,
            },
        );
        *state.used.entry((tenant_id.to_owned(), pool)).or_insert(0) += 1;
        Some(slot)
    }

    /// Releases a slot. Idempotent: releasing an unknown or already
    /// released slot logs a warning and changes nothing.
    pub fn release_slot(&self, slot: &ResourceSlot) {
        let mut state = self.state();
        match state.slots.remove(&slot.id()) {
            Some(record) => {
                let pool = record.resource_type.pool();
                state.decrement(&record.tenant_id, pool);
            }
            None => {
                warn!(
                    target: BROKER_TARGET,
                    slot = %slot.id(),
                    tenant = slot.tenant_id(),
                    "ignoring release of unknown or already released slot"
                );
            }
        }
    }

    /// Reports pool occupancy for a resource type.
    ///
    /// With a tenant, the numbers reflect that tenant's quota and usage;
    /// without, the total is the process default and usage is summed across
    /// tenants.
    #[must_use]
    pub fn availability(
        &self,
        resource_type: ResourceType,
        tenant_id: Option<&str>,
    ) -> Availability {
        let pool = resource_type.pool();
        let state = self.state();
        let (total, used) = match tenant_id {
            Some(tenant) => {
                let limit = self.effective_quotas(&state, tenant).limit_for(resource_type);
                let used = state
                    .used
                    .get(&(tenant.to_owned(), pool))
                    .copied()
                    .unwrap_or(0);
                (limit, used)
            }
            None => {
                let used = state
                    .used
                    .iter()
                    .filter(|((_, key_pool), _)| *key_pool == pool)
                    .map(|(_, count)| *count)
                    .sum();
                (self.defaults.limit_for(resource_type), used)
            }
        };
        Availability {
            total,
            used,
            available: total.saturating_sub(used),
            queue_length: 0,
        }
    }

    /// Stores a per-tenant override, folding onto any existing one, and
    /// publishes the effective quotas through the mirror when present.
    pub fn set_quota(&self, tenant_id: &str, overrides: QuotaOverrides) {
        let effective = {
            let mut state = self.state();
            let folded = state
                .overrides
                .get(tenant_id)
                .map_or(overrides, |existing| existing.overlaid(&overrides));
            state.overrides.insert(tenant_id.to_owned(), folded);
            self.defaults.merged(&folded)
        };

        if let Some(mirror) = &self.mirror
            && let Err(error) = mirror.publish(tenant_id, &effective)
        {
            warn!(
                target: BROKER_TARGET,
                tenant = tenant_id,
                error = %error,
                "quota mirror publish failed; enforcement stays process-local"
            );
        }
    }

    /// Returns the tenant's effective quotas (defaults plus overrides).
    #[must_use]
    pub fn quota(&self, tenant_id: &str) -> TenantQuotas {
        let state = self.state();
        self.effective_quotas(&state, tenant_id)
    }

    fn effective_quotas(&self, state: &BrokerState, tenant_id: &str) -> TenantQuotas {
        state
            .overrides
            .get(tenant_id)
            .map_or(self.defaults, |overrides| self.defaults.merged(overrides))
    }

    /// Force-releases every slot whose expiry has passed, returning the
    /// number of slots reclaimed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state();
        let expired: Vec<Uuid> = state
            .slots
            .iter()
            .filter_map(|(id, record)| {
                record
                    .expires_at
                    .filter(|deadline| *deadline <= now)
                    .map(|_| *id)
            })
            .collect();
        for id in &expired {
            if let Some(record) = state.slots.remove(id) {
                let pool = record.resource_type.pool();
                warn!(
                    target: BROKER_TARGET,
                    slot = %id,
                    tenant = %record.tenant_id,
                    resource = %record.resource_type,
                    "force-releasing expired slot"
                );
                state.decrement(&record.tenant_id, pool);
            }
        }
        expired.len()
    }

    /// Runs the expiry sweep on a background thread at the given interval.
    #[must_use]
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let broker = Arc::clone(self);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            info!(
                target: BROKER_TARGET,
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                "slot sweeper active"
            );
            let mut next_sweep = Instant::now() + interval;
            while !shutdown_flag.load(Ordering::SeqCst) {
                if Instant::now() >= next_sweep {
                    let reclaimed = broker.sweep();
                    if reclaimed > 0 {
                        info!(target: BROKER_TARGET, reclaimed, "sweep reclaimed expired slots");
                    }
                    next_sweep = Instant::now() + interval;
                }
                thread::sleep(SWEEP_POLL.min(interval));
            }
        });
        SweeperHandle {
            shutdown,
            handle: Some(handle),
        }
    }
}

impl std::fmt::Debug for ResourceBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBroker")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Handle to the background sweeper thread.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Signals shutdown and waits for the thread to exit.
    pub fn join(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
