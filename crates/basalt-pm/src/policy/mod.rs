//! # Power Policies
//!
//! A policy answers two questions for the coordinator: does the device
//! need to be active at all, and are shader cores needed right now.
//! Exactly one policy is current at a time; switching tears down the
//! outgoing policy's private data before the incoming one's is built.
//!
//! Policies must satisfy the engine invariant
//! `shaders_needed() == true ⇒ shaders_desired == true`; the
//! coordinator derives `shaders_desired` directly from
//! `shaders_needed`, and the test suite checks the composition.

use basalt_core::{PmSchedFlags, PolicyId};

mod always_on;
mod coarse_demand;

#[cfg(feature = "always-on-demand")]
mod always_on_demand;

pub use always_on::AlwaysOn;
pub use coarse_demand::CoarseDemand;

#[cfg(feature = "always-on-demand")]
pub use always_on_demand::AlwaysOnDemand;

// =============================================================================
// DEMAND SNAPSHOT
// =============================================================================

/// Snapshot of external demand a policy decides against.
#[derive(Debug, Clone, Copy, Default)]
pub struct Demand {
    /// Jobs currently submitted to the device.
    pub active_jobs: u32,
}

// =============================================================================
// PER-POLICY PRIVATE DATA
// =============================================================================

/// Private state owned by the current policy.
///
/// Built by [`PowerPolicy::init`] on activation and torn down by
/// [`PowerPolicy::term`] when the policy is swapped out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyData {
    /// State for [`AlwaysOn`].
    AlwaysOn,
    /// State for [`CoarseDemand`].
    CoarseDemand,
    /// State for [`AlwaysOnDemand`].
    #[cfg(feature = "always-on-demand")]
    AlwaysOnDemand,
}

// =============================================================================
// POLICY TRAIT
// =============================================================================

/// A pluggable power policy.
///
/// Implementations are stateless statics; mutable per-policy state
/// lives in the [`PolicyData`] the coordinator owns.
pub trait PowerPolicy: Sync {
    /// Stable identifier.
    fn id(&self) -> PolicyId;

    /// Human-readable name for logs.
    fn name(&self) -> &'static str;

    /// Build the policy's private data on activation. Must not touch
    /// hardware; the cores may be in any state at this point.
    fn init(&self) -> PolicyData;

    /// Tear down the private data on deactivation.
    fn term(&self, data: PolicyData) {
        let _ = data;
    }

    /// Whether shader cores are needed under the given demand.
    fn shaders_needed(&self, data: &PolicyData, demand: &Demand) -> bool;

    /// Whether the device as a whole should be powered.
    ///
    /// Must meet or exceed the power level implied by
    /// [`Self::shaders_needed`].
    fn device_active(&self, data: &PolicyData, demand: &Demand) -> bool;

    /// Scheduling flags the job scheduler should honour while this
    /// policy is current.
    fn sched_flags(&self) -> PmSchedFlags {
        PmSchedFlags::empty()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// The coarse-demand policy instance.
pub static COARSE_DEMAND: CoarseDemand = CoarseDemand;
/// The always-on policy instance.
pub static ALWAYS_ON: AlwaysOn = AlwaysOn;
/// The always-on-demand debug policy instance.
#[cfg(feature = "always-on-demand")]
pub static ALWAYS_ON_DEMAND: AlwaysOnDemand = AlwaysOnDemand;

/// All policies available on this build, default first.
pub static POLICIES: &[&'static dyn PowerPolicy] = &[
    &COARSE_DEMAND,
    &ALWAYS_ON,
    #[cfg(feature = "always-on-demand")]
    &ALWAYS_ON_DEMAND,
];

/// Look a policy up by id.
pub fn policy_by_id(id: PolicyId) -> Option<&'static dyn PowerPolicy> {
    POLICIES.iter().copied().find(|p| p.id() == id)
}

// =============================================================================
// TESTS
// =============================================================================
