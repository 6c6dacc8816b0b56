//! "Always on" power policy: never power anything down.

use basalt_core::{PmSchedFlags, PolicyId};

use super::{Demand, PolicyData, PowerPolicy};

/// Keeps the device and all shader cores powered while attached.
///
/// Removes every power-transition latency at the cost of idle power;
/// the scheduler is told never to suspend idle groups.
#[derive(Debug)]
pub struct AlwaysOn;

impl PowerPolicy for AlwaysOn {
    fn id(&self) -> PolicyId {
        PolicyId::AlwaysOn
    }

    fn name(&self) -> &'static str {
        "always_on"
    }

    fn init(&self) -> PolicyData {
        PolicyData::AlwaysOn
    }

    fn shaders_needed(&self, _data: &PolicyData, _demand: &Demand) -> bool {
        true
    }

    fn device_active(&self, _data: &PolicyData, _demand: &Demand) -> bool {
        true
    }

    fn sched_flags(&self) -> PmSchedFlags {
        PmSchedFlags::CORE_KEEP_ON
            | PmSchedFlags::SCHED_IGNORE_IDLE
            | PmSchedFlags::SCHED_NO_SUSPEND
    }
}
