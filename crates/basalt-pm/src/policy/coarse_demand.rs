//! Coarse demand power policy.

use basalt_core::{PmSchedFlags, PolicyId};

use super::{Demand, PolicyData, PowerPolicy};

/// Mirrors the workload demand signal directly: cores are wanted
/// exactly while jobs are submitted. All smoothing is left to the
/// engine's hysteresis timer; the policy adds none of its own.
#[derive(Debug)]
pub struct CoarseDemand;

impl PowerPolicy for CoarseDemand {
    fn id(&self) -> PolicyId {
        PolicyId::CoarseDemand
    }

    fn name(&self) -> &'static str {
        "coarse_demand"
    }

    fn init(&self) -> PolicyData {
        PolicyData::CoarseDemand
    }

    fn shaders_needed(&self, _data: &PolicyData, demand: &Demand) -> bool {
        demand.active_jobs > 0
    }

    fn device_active(&self, _data: &PolicyData, demand: &Demand) -> bool {
        demand.active_jobs > 0
    }

    fn sched_flags(&self) -> PmSchedFlags {
        PmSchedFlags::empty()
    }
}
