//! Debug-only hybrid policy: device always active, shaders on demand.
//!
//! Useful for isolating shader power-cycling behaviour while keeping
//! the L2 and MCU permanently up. Not part of customer builds.

use basalt_core::{PmSchedFlags, PolicyId};

use super::{Demand, PolicyData, PowerPolicy};

/// Keeps the device active at all times but lets the shader cores
/// follow demand.
#[derive(Debug)]
pub struct AlwaysOnDemand;

impl PowerPolicy for AlwaysOnDemand {
    fn id(&self) -> PolicyId {
        PolicyId::AlwaysOnDemand
    }

    fn name(&self) -> &'static str {
        "always_on_demand"
    }

    fn init(&self) -> PolicyData {
        PolicyData::AlwaysOnDemand
    }

    fn shaders_needed(&self, _data: &PolicyData, demand: &Demand) -> bool {
        demand.active_jobs > 0
    }

    fn device_active(&self, _data: &PolicyData, _demand: &Demand) -> bool {
        true
    }

    fn sched_flags(&self) -> PmSchedFlags {
        PmSchedFlags::SCHED_IGNORE_IDLE
    }
}
