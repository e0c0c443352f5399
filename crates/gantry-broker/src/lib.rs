//! Per-tenant resource slot brokering for the Gantry host.
//!
//! The [`ResourceBroker`] hands out [`ResourceSlot`]s per tenant and
//! resource type, bounded by quotas merged from process-wide defaults and
//! per-tenant overrides. Acquisition is strictly non-blocking: exhaustion
//! returns `None` and the caller chooses its own retry policy. Slot counts
//! are authoritative within this process only; per-tenant overrides are
//! mirrored best-effort to an external cache for visibility, never for
//! enforcement.
//!
//! A background sweeper reclaims slots whose `expires_at` has passed,
//! recovering permits leaked by crashed execution paths.

pub mod broker;
pub mod quota;

pub use broker::{Availability, MirrorError, QuotaMirror, ResourceBroker, ResourceSlot, SweeperHandle};
pub use quota::{QuotaOverrides, QuotaPool, ResourceType, TenantQuotas};
