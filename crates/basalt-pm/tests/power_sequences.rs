//! End-to-end power sequences against a scripted hardware mock.

use std::cell::{Cell, RefCell};

use basalt_pm::{
    CoreMask, CoreType, Error, HwCaps, JobSlot, L2State, McuState, PmConfig, PmDevice, PmHardware,
    PmSchedFlags, PolicyId, ShaderState,
};

const MS: u64 = 1_000_000;

// =============================================================================
// HARDWARE MOCK
// =============================================================================

/// Scripted hardware. When `responds` is set (the default), every power
/// request is immediately reflected in the corresponding ready mask, so
/// readiness polls succeed on their first iteration.
struct MockHw {
    responds: Cell<bool>,
    now_ns: Cell<u64>,
    ready_l2: Cell<CoreMask>,
    ready_shader: Cell<CoreMask>,
    ready_stack: Cell<CoreMask>,
    ready_mcu: Cell<CoreMask>,
    requests: RefCell<Vec<(CoreType, CoreMask)>>,
    fw_calls: RefCell<Vec<&'static str>>,
    hwcnt_enables: Cell<u32>,
    hwcnt_disables: Cell<u32>,
    /// When set, `hwcnt_disable` reports asynchronous completion.
    hwcnt_async: Cell<bool>,
    flush_starts: Cell<u32>,
    clock_slow: Cell<bool>,
}

impl MockHw {
    fn new() -> Self {
        Self {
            responds: Cell::new(true),
            now_ns: Cell::new(0),
            ready_l2: Cell::new(CoreMask::EMPTY),
            ready_shader: Cell::new(CoreMask::EMPTY),
            ready_stack: Cell::new(CoreMask::EMPTY),
            ready_mcu: Cell::new(CoreMask::EMPTY),
            requests: RefCell::new(Vec::new()),
            fw_calls: RefCell::new(Vec::new()),
            hwcnt_enables: Cell::new(0),
            hwcnt_disables: Cell::new(0),
            hwcnt_async: Cell::new(false),
            flush_starts: Cell::new(0),
            clock_slow: Cell::new(false),
        }
    }

    fn ready_cell(&self, domain: CoreType) -> &Cell<CoreMask> {
        match domain {
            CoreType::L2 => &self.ready_l2,
            CoreType::Shader => &self.ready_shader,
            CoreType::Stack => &self.ready_stack,
            CoreType::Mcu => &self.ready_mcu,
        }
    }

    fn advance_time(&self, delta_ns: u64) {
        self.now_ns.set(self.now_ns.get() + delta_ns);
    }

    fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl PmHardware for MockHw {
    fn write_power_request(&self, domain: CoreType, mask: CoreMask) {
        self.requests.borrow_mut().push((domain, mask));
        if self.responds.get() {
            self.ready_cell(domain).set(mask);
        }
    }

    fn read_power_ready(&self, domain: CoreType) -> CoreMask {
        self.ready_cell(domain).get()
    }

    fn read_transition_pending(&self, _domain: CoreType) -> bool {
        false
    }

    fn hwcnt_enable(&self) {
        self.hwcnt_enables.set(self.hwcnt_enables.get() + 1);
    }

    fn hwcnt_disable(&self) -> bool {
        self.hwcnt_disables.set(self.hwcnt_disables.get() + 1);
        !self.hwcnt_async.get()
    }

    fn firmware_reload(&self) {
        self.fw_calls.borrow_mut().push("reload");
    }

    fn firmware_global_reinit(&self) {
        self.fw_calls.borrow_mut().push("glb_reinit");
    }

    fn firmware_update_core_mask(&self, _mask: CoreMask) {
        self.fw_calls.borrow_mut().push("core_mask");
    }

    fn firmware_halt(&self) {
        self.fw_calls.borrow_mut().push("halt");
    }

    fn firmware_disable(&self) {
        self.fw_calls.borrow_mut().push("disable");
        self.ready_mcu.set(CoreMask::EMPTY);
    }

    fn cache_flush_start(&self) {
        self.flush_starts.set(self.flush_starts.get() + 1);
    }

    fn cache_flush_complete(&self) -> bool {
        true
    }

    fn set_clock_slowdown(&self, slow: bool) {
        self.clock_slow.set(slow);
    }

    fn time_ns(&self) -> u64 {
        self.now_ns.get()
    }
}

fn device() -> PmDevice<MockHw> {
    PmDevice::new(MockHw::new(), PmConfig::default())
}

fn device_with(config: PmConfig) -> PmDevice<MockHw> {
    PmDevice::new(MockHw::new(), config)
}

fn mcu_config() -> PmConfig {
    PmConfig {
        caps: HwCaps {
            has_mcu: true,
            ..HwCaps::default()
        },
        ..PmConfig::default()
    }
}

const SLOT0: JobSlot = JobSlot::new(0);

// =============================================================================
// POWER-UP / POWER-DOWN SEQUENCES
// =============================================================================

#[test]
fn job_submission_powers_everything_up() {
    let dev = device();
    assert_eq!(dev.l2_state(), L2State::Off);
    assert_eq!(dev.shaders_state(), ShaderState::OffCorestackOff);

    dev.on_job_submitted(SLOT0).unwrap();

    assert_eq!(dev.l2_state(), L2State::On);
    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);
    assert_eq!(dev.shaders_avail(), CoreMask::first(4));
    assert_eq!(dev.shaders_sync_mask(), CoreMask::first(4));
    assert!(dev.shaders_desired());
    assert!(dev.is_active());
    assert!(dev.in_desired_state());

    // L2 before stacks before shaders.
    let requests = dev.hw().requests.borrow();
    assert_eq!(requests[0], (CoreType::L2, CoreMask::first(1)));
    assert_eq!(requests[1], (CoreType::Stack, CoreMask::first(1)));
    assert_eq!(requests[2], (CoreType::Shader, CoreMask::first(4)));
    assert_eq!(dev.hw().hwcnt_enables.get(), 1);
}

#[test]
fn demand_drop_holds_cores_for_hysteresis_ticks() {
    let dev = device();
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_job_removed(SLOT0).unwrap();

    // Demand is gone but the cores stay on for the countdown.
    assert_eq!(dev.shaders_state(), ShaderState::WaitOffCorestackOn);
    assert_eq!(dev.l2_state(), L2State::On);
    assert_eq!(dev.hysteresis_remaining(), 2);

    dev.on_tick().unwrap();
    assert_eq!(dev.shaders_state(), ShaderState::WaitOffCorestackOn);
    assert_eq!(dev.hysteresis_remaining(), 1);

    // Second tick expires the countdown; the whole descent (flush,
    // shader off, stacks off, then the L2) runs in one evaluation.
    dev.on_tick().unwrap();
    assert_eq!(dev.shaders_state(), ShaderState::OffCorestackOff);
    assert_eq!(dev.l2_state(), L2State::Off);
    assert_eq!(dev.shaders_avail(), CoreMask::EMPTY);
    assert_eq!(dev.hw().flush_starts.get(), 1);
    assert!(dev.in_desired_state());
}

#[test]
fn renewed_demand_cancels_hysteresis_descent() {
    let dev = device();
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_job_removed(SLOT0).unwrap();
    dev.on_tick().unwrap();
    let requests_before = dev.hw().request_count();

    // Demand returns mid-countdown: back to on without touching
    // hardware.
    dev.on_job_submitted(SLOT0).unwrap();
    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);
    assert_eq!(dev.shaders_avail(), CoreMask::first(4));
    assert_eq!(dev.hw().request_count(), requests_before);

    // The tick that was already queued when the countdown was
    // cancelled runs as a no-op.
    dev.on_tick().unwrap();
    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);
}

#[test]
fn zero_hysteresis_powers_down_immediately() {
    let dev = device_with(PmConfig {
        hysteresis_ticks: 0,
        ..PmConfig::default()
    });
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_job_removed(SLOT0).unwrap();

    assert_eq!(dev.shaders_state(), ShaderState::OffCorestackOff);
    assert_eq!(dev.l2_state(), L2State::Off);
}

#[test]
fn l2_always_on_survives_shader_power_down() {
    let dev = device_with(PmConfig {
        l2_always_on: true,
        hysteresis_ticks: 0,
        ..PmConfig::default()
    });
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_job_removed(SLOT0).unwrap();

    assert_eq!(dev.shaders_state(), ShaderState::OffCorestackOff);
    assert_eq!(dev.l2_state(), L2State::On);
}

#[test]
fn cycle_counter_reference_holds_l2() {
    let dev = device();
    dev.request_cycle_counter().unwrap();
    assert_eq!(dev.l2_state(), L2State::On);
    assert_eq!(dev.shaders_state(), ShaderState::OffCorestackOff);

    dev.release_cycle_counter().unwrap();
    assert_eq!(dev.l2_state(), L2State::Off);
}

#[test]
fn clock_slowdown_workaround_wraps_l2_cycle() {
    let dev = device_with(PmConfig {
        clock_slow_down_wa: true,
        hysteresis_ticks: 0,
        ..PmConfig::default()
    });
    dev.on_job_submitted(SLOT0).unwrap();
    // RestoreClocks ran on the way up.
    assert!(!dev.hw().clock_slow.get());

    dev.on_job_removed(SLOT0).unwrap();
    // SlowDownClocks ran on the way down and the clock stays slow
    // while the device is off.
    assert!(dev.hw().clock_slow.get());
    assert_eq!(dev.l2_state(), L2State::Off);
}

// =============================================================================
// PARTIAL CORE MASK CHANGES
// =============================================================================

#[test]
fn core_mask_shrink_flushes_and_keeps_rest_on() {
    let dev = device();
    dev.set_policy(PolicyId::AlwaysOn).unwrap();
    assert_eq!(dev.shaders_avail(), CoreMask::first(4));
    let flushes_before = dev.hw().flush_starts.get();

    dev.set_core_mask(CoreMask::first(2)).unwrap();

    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);
    assert_eq!(dev.shaders_avail(), CoreMask::first(2));
    // A shrink flushes the L2 before dropping cores.
    assert_eq!(dev.hw().flush_starts.get(), flushes_before + 1);
    // The stacks never cycled.
    assert_eq!(dev.l2_state(), L2State::On);
}

#[test]
fn core_mask_grow_skips_flush() {
    let dev = device();
    dev.set_policy(PolicyId::AlwaysOn).unwrap();
    dev.set_core_mask(CoreMask::first(2)).unwrap();
    let flushes_before = dev.hw().flush_starts.get();

    dev.set_core_mask(CoreMask::first(3)).unwrap();

    assert_eq!(dev.shaders_avail(), CoreMask::first(3));
    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);
    assert_eq!(dev.hw().flush_starts.get(), flushes_before);
}

#[test]
fn core_mask_shrink_waits_for_running_jobs() {
    let dev = device();
    dev.on_job_submitted(SLOT0).unwrap();
    dev.set_core_mask(CoreMask::first(2)).unwrap();

    // Jobs may still be running on the cores about to drop.
    assert_eq!(dev.shaders_state(), ShaderState::WaitGpuIdle);
    assert_eq!(dev.shaders_avail(), CoreMask::first(4));

    dev.on_job_removed(SLOT0).unwrap();
    dev.on_gpu_idle().unwrap();
    // With demand gone entirely, the shrink turns into the normal
    // hysteresis descent instead.
    assert_eq!(dev.shaders_state(), ShaderState::WaitOffCorestackOn);
}

#[test]
fn invalid_core_mask_is_rejected() {
    let dev = device();
    assert_eq!(dev.set_core_mask(CoreMask::EMPTY), Err(Error::InvalidCoreMask));
    assert_eq!(
        dev.set_core_mask(CoreMask::new(0x100)),
        Err(Error::InvalidCoreMask)
    );
}

// =============================================================================
// POLICY ENGINE
// =============================================================================

#[test]
fn always_on_powers_up_without_demand() {
    let dev = device();
    dev.set_policy(PolicyId::AlwaysOn).unwrap();

    assert_eq!(dev.current_policy(), PolicyId::AlwaysOn);
    assert_eq!(dev.l2_state(), L2State::On);
    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);
    assert!(dev.sched_flags().contains(PmSchedFlags::CORE_KEEP_ON));
}

#[test]
fn switch_back_to_coarse_demand_powers_down_idle_device() {
    let dev = device_with(PmConfig {
        hysteresis_ticks: 0,
        ..PmConfig::default()
    });
    dev.set_policy(PolicyId::AlwaysOn).unwrap();
    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);

    dev.set_policy(PolicyId::CoarseDemand).unwrap();
    assert_eq!(dev.shaders_state(), ShaderState::OffCorestackOff);
    assert_eq!(dev.l2_state(), L2State::Off);
    assert_eq!(dev.sched_flags(), PmSchedFlags::empty());
}

#[test]
fn policy_switch_during_reset_is_deferred() {
    let dev = device();
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_reset_start();
    assert!(dev.in_reset());

    // The switch is accepted but does not take effect yet.
    dev.set_policy(PolicyId::AlwaysOn).unwrap();
    assert_eq!(dev.current_policy(), PolicyId::CoarseDemand);

    // Only one deferred switch may be outstanding.
    assert_eq!(
        dev.set_policy(PolicyId::CoarseDemand),
        Err(Error::PolicyChangePending)
    );

    dev.on_reset_complete().unwrap();
    assert_eq!(dev.current_policy(), PolicyId::AlwaysOn);
    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);
}

// =============================================================================
// RESET
// =============================================================================

#[test]
fn reset_restarts_machines_from_off() {
    let dev = device();
    dev.on_job_submitted(SLOT0).unwrap();
    let requests_at_on = dev.hw().request_count();

    dev.on_reset_start();
    assert_eq!(dev.l2_state(), L2State::ResetWait);
    assert_eq!(dev.shaders_state(), ShaderState::ResetWait);

    // Stimuli during the reset do not move the machines.
    dev.on_tick().unwrap();
    dev.update_state().unwrap();
    assert_eq!(dev.hw().request_count(), requests_at_on);

    // The job is still pending, so completion powers straight back up.
    dev.on_reset_complete().unwrap();
    assert_eq!(dev.l2_state(), L2State::On);
    assert_eq!(dev.shaders_state(), ShaderState::OnCorestackOn);
    assert!(dev.hw().request_count() > requests_at_on);
}

#[test]
fn reset_cancels_hysteresis_countdown() {
    let dev = device();
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_job_removed(SLOT0).unwrap();
    assert_eq!(dev.shaders_state(), ShaderState::WaitOffCorestackOn);

    dev.on_reset_start();
    dev.on_reset_complete().unwrap();

    // No demand and no countdown: everything stays off.
    assert_eq!(dev.shaders_state(), ShaderState::OffCorestackOff);
    assert_eq!(dev.l2_state(), L2State::Off);
    assert_eq!(dev.hysteresis_remaining(), 0);
}

// =============================================================================
// FAILURE HANDLING
// =============================================================================

#[test]
fn poll_timeout_degrades_device_permanently() {
    let hw = MockHw::new();
    hw.responds.set(false);
    let dev = PmDevice::new(
        hw,
        PmConfig {
            poll_retries: 8,
            ..PmConfig::default()
        },
    );

    assert_eq!(
        dev.on_job_submitted(SLOT0),
        Err(Error::PollTimeout {
            domain: CoreType::L2
        })
    );
    assert!(dev.is_degraded());

    // Everything afterwards is refused.
    assert_eq!(dev.update_state(), Err(Error::DeviceUnusable));
    assert_eq!(dev.set_policy(PolicyId::AlwaysOn), Err(Error::DeviceUnusable));
    assert_eq!(dev.request_cycle_counter(), Err(Error::DeviceUnusable));
}

#[test]
fn async_hwcnt_disable_parks_l2_power_down() {
    let dev = device_with(PmConfig {
        hysteresis_ticks: 0,
        ..PmConfig::default()
    });
    dev.hw().hwcnt_async.set(true);
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_job_removed(SLOT0).unwrap();

    // Shaders are down but the L2 waits for the counter dump.
    assert_eq!(dev.shaders_state(), ShaderState::OffCorestackOff);
    assert_eq!(dev.l2_state(), L2State::OnHwcntDisable);
    assert_eq!(dev.hw().hwcnt_disables.get(), 1);

    dev.on_hwcnt_disable_complete().unwrap();
    assert_eq!(dev.l2_state(), L2State::Off);
}

#[test]
fn hwcnt_desired_follows_the_owning_machine() {
    let dev = device_with(PmConfig {
        hysteresis_ticks: 0,
        ..PmConfig::default()
    });
    assert!(!dev.hwcnt_desired());

    dev.on_job_submitted(SLOT0).unwrap();
    assert!(dev.hwcnt_desired());

    dev.on_job_removed(SLOT0).unwrap();
    assert!(!dev.hwcnt_desired());
}

#[test]
fn renewed_demand_unwinds_pending_hwcnt_disable() {
    let dev = device_with(PmConfig {
        hysteresis_ticks: 0,
        ..PmConfig::default()
    });
    dev.hw().hwcnt_async.set(true);
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_job_removed(SLOT0).unwrap();
    assert_eq!(dev.l2_state(), L2State::OnHwcntDisable);

    dev.on_job_submitted(SLOT0).unwrap();
    assert_eq!(dev.l2_state(), L2State::On);
    assert_eq!(dev.hw().hwcnt_enables.get(), 2);
}

// =============================================================================
// MCU SEQUENCES
// =============================================================================

#[test]
fn mcu_boot_waits_for_firmware_acks() {
    let dev = device_with(mcu_config());
    dev.on_job_submitted(SLOT0).unwrap();

    // Parked on the firmware boot acknowledgment; counters belong to
    // the MCU machine and are not wanted until it is up.
    assert_eq!(dev.mcu_state(), Some(McuState::PendOnReload));
    assert_eq!(dev.hw().fw_calls.borrow().as_slice(), ["reload"]);
    assert!(!dev.hwcnt_desired());

    dev.on_firmware_reloaded().unwrap();
    assert_eq!(dev.mcu_state(), Some(McuState::OnGlbReinitPend));

    dev.on_global_reinit_complete().unwrap();
    assert_eq!(dev.mcu_state(), Some(McuState::On));
    assert!(dev.hwcnt_desired());
    assert_eq!(
        dev.hw().fw_calls.borrow().as_slice(),
        ["reload", "glb_reinit"]
    );
}

#[test]
fn mcu_halt_sequence_runs_before_l2_power_down() {
    let dev = device_with(PmConfig {
        hysteresis_ticks: 0,
        ..mcu_config()
    });
    dev.on_job_submitted(SLOT0).unwrap();
    dev.on_firmware_reloaded().unwrap();
    dev.on_global_reinit_complete().unwrap();

    dev.on_job_removed(SLOT0).unwrap();
    // Halt requested; the L2 must stay up until the MCU is off.
    assert_eq!(dev.mcu_state(), Some(McuState::OnPendHalt));
    assert_ne!(dev.l2_state(), L2State::Off);

    dev.on_halt_complete().unwrap();
    assert_eq!(dev.mcu_state(), Some(McuState::Off));
    assert_eq!(dev.l2_state(), L2State::Off);
    assert!(dev
        .hw()
        .fw_calls
        .borrow()
        .ends_with(&["halt", "disable"]));
}

#[test]
fn mcu_core_mask_update_goes_through_firmware() {
    let dev = device_with(mcu_config());
    dev.set_policy(PolicyId::AlwaysOn).unwrap();
    dev.on_firmware_reloaded().unwrap();
    dev.on_global_reinit_complete().unwrap();
    assert_eq!(dev.mcu_state(), Some(McuState::On));

    dev.set_core_mask(CoreMask::first(2)).unwrap();
    assert_eq!(dev.mcu_state(), Some(McuState::OnCoreMaskUpdatePend));

    dev.on_core_mask_update_complete().unwrap();
    assert_eq!(dev.mcu_state(), Some(McuState::On));
    assert!(dev.hw().fw_calls.borrow().contains(&"core_mask"));
}

#[test]
fn missed_firmware_ack_deadline_is_fatal() {
    let dev = device_with(mcu_config());
    dev.on_job_submitted(SLOT0).unwrap();
    assert_eq!(dev.mcu_state(), Some(McuState::PendOnReload));

    dev.hw().advance_time(dev.config().ack_budget_ns + 1);
    assert_eq!(
        dev.update_state(),
        Err(Error::AckTimeout {
            domain: CoreType::Mcu
        })
    );
    assert!(dev.is_degraded());
}

#[test]
fn firmware_callbacks_require_an_mcu() {
    let dev = device();
    assert_eq!(dev.on_firmware_reloaded(), Err(Error::NoMcu));
    assert_eq!(dev.on_halt_complete(), Err(Error::NoMcu));
    assert_eq!(dev.mcu_state(), None);
}

// =============================================================================
// DVFS METRICS
// =============================================================================

#[test]
fn metrics_windows_split_busy_and_idle() {
    let dev = device();
    dev.hw().advance_time(MS);
    dev.on_job_submitted(SLOT0).unwrap();
    dev.hw().advance_time(2 * MS);
    dev.on_job_removed(SLOT0).unwrap();
    dev.hw().advance_time(MS);

    let w = dev.sample_metrics();
    assert_eq!(w.window_ns, 4 * MS);
    assert_eq!(w.busy_ns, 2 * MS);
    assert_eq!(w.idle_ns, 2 * MS);
    assert_eq!(w.in_protected_ns, 0);

    // Next window starts from zero.
    dev.hw().advance_time(3 * MS);
    let w = dev.sample_metrics();
    assert_eq!(w.window_ns, 3 * MS);
    assert_eq!(w.busy_ns, 0);
    assert_eq!(w.idle_ns, 3 * MS);
}

#[test]
fn protected_time_is_busy_and_holds_l2() {
    let dev = device();
    dev.hw().advance_time(MS);
    dev.on_protected_entry().unwrap();
    assert_eq!(dev.l2_state(), L2State::On);

    dev.hw().advance_time(3 * MS);
    dev.on_protected_exit().unwrap();
    assert_eq!(dev.l2_state(), L2State::Off);

    let w = dev.sample_metrics();
    assert_eq!(w.in_protected_ns, 3 * MS);
    assert_eq!(w.busy_ns, 3 * MS);
    assert_eq!(w.idle_ns, MS);
}
