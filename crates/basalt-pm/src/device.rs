//! # Device Power Coordinator
//!
//! One [`PmDevice`] exists per managed GPU, constructed at device
//! attach and dropped at detach. It owns the three state machines, the
//! current policy, the DVFS metrics sampler and the lock hierarchy that
//! keeps them consistent:
//!
//! 1. `shared`, the device-wide lock: desired flags, demand counters,
//!    reset/protected/degraded status and the published per-domain "on"
//!    states used for cross-domain checks all live under it.
//! 2. per-domain locks (`l2`, `mcu`, `shaders`), each holding one
//!    machine's current state. Only the evaluator, holding first
//!    `shared` and then the domain lock, ever mutates a state.
//!
//! Every external stimulus (job submitted/removed, hysteresis tick,
//! reset, protected-mode transition, firmware ack, policy switch)
//! funnels into one re-evaluation entry point that walks the machines
//! in the order L2 → MCU → Shaders until no machine makes progress, so
//! a downstream domain never sees a stale upstream state within a pass.

use basalt_core::{CoreMask, Error, JobSlot, PmHardware, PmSchedFlags, PolicyId, Result};
use log::{debug, error, warn};
use spin::Mutex;

use crate::config::PmConfig;
use crate::l2::{L2Sm, L2State};
use crate::mcu::{McuSm, McuState};
use crate::metrics::{Metrics, MetricsWindow};
use crate::policy::{policy_by_id, Demand, PolicyData, PowerPolicy, COARSE_DEMAND};
use crate::shaders::{ShaderSm, ShaderState};

/// Upper bound on evaluation passes per entry. The longest state chain
/// is shorter than this; hitting the bound means a machine is livelocked
/// and is worth a warning rather than a hang.
const MAX_EVAL_PASSES: u32 = 32;

// =============================================================================
// SHARED (DEVICE-WIDE) STATE
// =============================================================================

/// State protected by the device-wide lock.
pub(crate) struct Shared {
    // Desired inputs, rewritten from policy + demand on every entry.
    pub(crate) l2_desired: bool,
    pub(crate) mcu_desired: bool,
    pub(crate) shaders_desired: bool,
    /// Mask the shader machine converges to while shaders are desired.
    pub(crate) shaders_desired_mask: CoreMask,
    /// Core mask requested by the DVFS governor (or debugfs).
    pub(crate) requested_core_mask: CoreMask,

    // Demand and override inputs.
    pub(crate) active_jobs: u32,
    pub(crate) in_reset: bool,
    pub(crate) protected_override: bool,
    pub(crate) cycle_counter_requests: u32,
    pub(crate) degraded: bool,

    // Published machine outputs for cross-domain checks.
    pub(crate) l2_on: bool,
    pub(crate) shaders_off: bool,
    pub(crate) mcu_off: bool,

    // Hardware-counter bookkeeping shared by the L2/MCU machines.
    pub(crate) hwcnt_desired: bool,
    pub(crate) hwcnt_disabled: bool,
    pub(crate) hwcnt_disable_pending: bool,

    // Policy engine state.
    pub(crate) policy: &'static dyn PowerPolicy,
    pub(crate) policy_data: PolicyData,
    pub(crate) sched_flags: PmSchedFlags,
    pub(crate) pending_policy: Option<&'static dyn PowerPolicy>,
}

impl Shared {
    fn demand(&self) -> Demand {
        Demand {
            active_jobs: self.active_jobs,
        }
    }
}

// =============================================================================
// DEVICE
// =============================================================================

/// Per-device power coordinator.
///
/// `H` is the injected hardware collaborator; production supplies the
/// register-I/O backend, tests supply a scripted mock.
pub struct PmDevice<H: PmHardware> {
    hw: H,
    config: PmConfig,
    shared: Mutex<Shared>,
    l2: Mutex<L2Sm>,
    mcu: Mutex<McuSm>,
    shaders: Mutex<ShaderSm>,
    metrics: Metrics,
    /// Serializes policy switches; `try_lock` failure is the "busy"
    /// condition reported to callers.
    policy_change: Mutex<()>,
}

impl<H: PmHardware> PmDevice<H> {
    /// Build the coordinator for one device. All domains start off;
    /// the default policy is coarse demand.
    pub fn new(hw: H, config: PmConfig) -> Self {
        let policy: &'static dyn PowerPolicy = &COARSE_DEMAND;
        let now = hw.time_ns();
        let dev = Self {
            metrics: Metrics::new(now),
            shared: Mutex::new(Shared {
                l2_desired: false,
                mcu_desired: false,
                shaders_desired: false,
                shaders_desired_mask: config.caps.shader_present,
                requested_core_mask: config.caps.shader_present,
                active_jobs: 0,
                in_reset: false,
                protected_override: false,
                cycle_counter_requests: 0,
                degraded: false,
                l2_on: false,
                shaders_off: true,
                mcu_off: true,
                hwcnt_desired: false,
                hwcnt_disabled: true,
                hwcnt_disable_pending: false,
                policy,
                policy_data: policy.init(),
                sched_flags: policy.sched_flags(),
                pending_policy: None,
            }),
            l2: Mutex::new(L2Sm::new()),
            mcu: Mutex::new(McuSm::new()),
            shaders: Mutex::new(ShaderSm::new(config.hysteresis_ticks)),
            policy_change: Mutex::new(()),
            hw,
            config,
        };
        debug!("pm: device attached, policy {}", policy.name());
        dev
    }

    /// The injected hardware collaborator.
    #[inline]
    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// The probe-time configuration.
    #[inline]
    pub fn config(&self) -> &PmConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Recompute the desired inputs from the current policy and demand.
    fn refresh_desired(&self, shared: &mut Shared) {
        let demand = shared.demand();
        let shaders_needed = shared.policy.shaders_needed(&shared.policy_data, &demand);
        let active = shared.policy.device_active(&shared.policy_data, &demand);
        let keep_mcu = shared.sched_flags.contains(PmSchedFlags::CORE_KEEP_ON);

        shared.shaders_desired = shaders_needed;
        shared.shaders_desired_mask = shared
            .requested_core_mask
            .clamp_to(self.config.caps.shader_present);
        shared.mcu_desired =
            self.config.caps.has_mcu && (active || shaders_needed || keep_mcu);
        shared.l2_desired = active || shaders_needed || shared.mcu_desired;
    }

    /// Fold a machine step result into the pass, degrading the device
    /// on a fatal error.
    fn fold(&self, shared: &mut Shared, step: Result<bool>) -> Result<bool> {
        match step {
            Ok(progressed) => Ok(progressed),
            Err(e) => {
                shared.degraded = true;
                error!("pm: fatal power transition failure, device degraded: {e}");
                Err(e)
            }
        }
    }

    /// Drive all machines to a fixed point. Caller holds `shared`.
    fn update_locked(&self, shared: &mut Shared) -> Result<()> {
        if shared.degraded {
            return Err(Error::DeviceUnusable);
        }
        if shared.in_reset {
            // Desired inputs freeze for the duration of a reset.
            return Ok(());
        }
        self.refresh_desired(shared);

        let mut passes = 0;
        loop {
            let mut progressed = false;

            {
                let mut l2 = self.l2.lock();
                let step = l2.step(shared, &self.hw, &self.config);
                shared.l2_on = l2.is_on();
                progressed |= self.fold(shared, step)?;
            }

            if self.config.caps.has_mcu {
                let l2_on = shared.l2_on;
                let mut mcu = self.mcu.lock();
                let step = mcu.step(shared, l2_on, &self.hw, &self.config);
                shared.mcu_off = mcu.state() == McuState::Off;
                progressed |= self.fold(shared, step)?;
            }

            {
                let l2_on = shared.l2_on;
                let mut shaders = self.shaders.lock();
                let step = shaders.step(shared, l2_on, &self.hw, &self.config);
                shared.shaders_off = shaders.is_off();
                progressed |= self.fold(shared, step)?;
            }

            if !progressed {
                return Ok(());
            }
            passes += 1;
            if passes >= MAX_EVAL_PASSES {
                warn!("pm: evaluation did not reach a fixed point in {MAX_EVAL_PASSES} passes");
                return Ok(());
            }
        }
    }

    /// Re-evaluate all state machines. The public entry point for any
    /// collaborator that changed an input out of band.
    pub fn update_state(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        self.update_locked(&mut shared)
    }

    // -------------------------------------------------------------------------
    // Job scheduler collaborator
    // -------------------------------------------------------------------------

    /// A job was submitted to `slot`.
    pub fn on_job_submitted(&self, slot: JobSlot) -> Result<()> {
        self.metrics.record_active(slot, true, self.hw.time_ns());
        let mut shared = self.shared.lock();
        shared.active_jobs = shared.active_jobs.saturating_add(1);
        self.update_locked(&mut shared)
    }

    /// A job finished or was removed from `slot`.
    pub fn on_job_removed(&self, slot: JobSlot) -> Result<()> {
        self.metrics.record_active(slot, false, self.hw.time_ns());
        let mut shared = self.shared.lock();
        shared.active_jobs = shared.active_jobs.saturating_sub(1);
        self.update_locked(&mut shared)
    }

    /// Drain signal: no jobs remain on the affected cores. Unparks a
    /// shader machine waiting in its idle state.
    pub fn on_gpu_idle(&self) -> Result<()> {
        self.update_state()
    }

    /// Whether the scheduler may dispatch shader work.
    pub fn shaders_desired(&self) -> bool {
        self.shared.lock().shaders_desired
    }

    /// Whether the device as a whole should currently be powered.
    pub fn is_active(&self) -> bool {
        let shared = self.shared.lock();
        let demand = shared.demand();
        shared.policy.device_active(&shared.policy_data, &demand)
    }

    /// Scheduling flags of the current policy.
    pub fn sched_flags(&self) -> PmSchedFlags {
        self.shared.lock().sched_flags
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    /// One tick of the hysteresis timer collaborator. During a reset
    /// (or after a cancellation) the tick runs as a no-op.
    pub fn on_tick(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        {
            let mut shaders = self.shaders.lock();
            let _ = shaders.timer.tick();
        }
        if shared.in_reset {
            return Ok(());
        }
        self.update_locked(&mut shared)
    }

    /// Close the current DVFS window and return it to the governor.
    pub fn sample_metrics(&self) -> MetricsWindow {
        self.metrics.sample_and_reset(self.hw.time_ns())
    }

    /// The metrics sampler (scheduler activity reporting).
    #[inline]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // -------------------------------------------------------------------------
    // Reset controller collaborator
    // -------------------------------------------------------------------------

    /// A device reset began: freeze desired interpretation and move
    /// every machine to its reset-wait state.
    pub fn on_reset_start(&self) {
        let mut shared = self.shared.lock();
        if shared.in_reset {
            return;
        }
        debug!("pm: reset start");
        shared.in_reset = true;
        shared.l2_on = false;
        shared.shaders_off = false;
        self.l2.lock().enter_reset();
        self.mcu.lock().enter_reset();
        self.shaders.lock().enter_reset();
    }

    /// The reset completed: every machine restarts from off, timers are
    /// cleared, and a deferred policy switch (if any) is applied.
    pub fn on_reset_complete(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        if !shared.in_reset {
            return Ok(());
        }
        debug!("pm: reset complete");
        self.l2.lock().reset_complete();
        self.mcu.lock().reset_complete();
        self.shaders.lock().reset_complete();
        shared.in_reset = false;
        shared.l2_on = false;
        shared.shaders_off = true;
        shared.mcu_off = true;
        shared.hwcnt_desired = false;
        shared.hwcnt_disabled = true;
        shared.hwcnt_disable_pending = false;

        if let Some(policy) = shared.pending_policy.take() {
            self.switch_policy_locked(&mut shared, policy);
        }
        self.update_locked(&mut shared)
    }

    /// Whether a reset is currently in progress.
    pub fn in_reset(&self) -> bool {
        self.shared.lock().in_reset
    }

    // -------------------------------------------------------------------------
    // Protected mode
    // -------------------------------------------------------------------------

    /// A protected-mode transition began; the L2 is held on for its
    /// duration and the time is accounted as busy.
    pub fn on_protected_entry(&self) -> Result<()> {
        self.metrics.set_protected(true, self.hw.time_ns());
        let mut shared = self.shared.lock();
        shared.protected_override = true;
        self.update_locked(&mut shared)
    }

    /// The protected-mode transition finished.
    pub fn on_protected_exit(&self) -> Result<()> {
        self.metrics.set_protected(false, self.hw.time_ns());
        let mut shared = self.shared.lock();
        shared.protected_override = false;
        self.update_locked(&mut shared)
    }

    // -------------------------------------------------------------------------
    // Cycle-counter users
    // -------------------------------------------------------------------------

    /// Take a reference on the GPU cycle counter; the L2 stays on while
    /// any reference is held.
    pub fn request_cycle_counter(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.degraded {
            return Err(Error::DeviceUnusable);
        }
        shared.cycle_counter_requests = shared.cycle_counter_requests.saturating_add(1);
        self.update_locked(&mut shared)
    }

    /// Drop a cycle-counter reference.
    pub fn release_cycle_counter(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.cycle_counter_requests = shared.cycle_counter_requests.saturating_sub(1);
        self.update_locked(&mut shared)
    }

    // -------------------------------------------------------------------------
    // Policy engine
    // -------------------------------------------------------------------------

    /// Switch to the policy identified by `id`.
    ///
    /// Returns [`Error::PolicyChangeBusy`] when another switch is in
    /// flight (no queuing). During a reset the switch is deferred and
    /// applied on reset completion; only one may be queued.
    pub fn set_policy(&self, id: PolicyId) -> Result<()> {
        let policy = policy_by_id(id).ok_or(Error::UnknownPolicy)?;
        let _serial = self
            .policy_change
            .try_lock()
            .ok_or(Error::PolicyChangeBusy)?;

        let mut shared = self.shared.lock();
        if shared.degraded {
            return Err(Error::DeviceUnusable);
        }
        if shared.in_reset {
            if shared.pending_policy.is_some() {
                return Err(Error::PolicyChangePending);
            }
            debug!("pm: policy switch to {} deferred until reset completes", policy.name());
            shared.pending_policy = Some(policy);
            return Ok(());
        }

        self.switch_policy_locked(&mut shared, policy);
        self.update_locked(&mut shared)
    }

    /// Tear down the outgoing policy and activate `policy`. In-flight
    /// hardware transitions are untouched; only future desired inputs
    /// change.
    fn switch_policy_locked(&self, shared: &mut Shared, policy: &'static dyn PowerPolicy) {
        let old = shared.policy;
        debug!("pm: policy {} -> {}", old.name(), policy.name());
        old.term(shared.policy_data);
        shared.policy = policy;
        shared.policy_data = policy.init();
        shared.sched_flags = policy.sched_flags();
    }

    /// Id of the current policy.
    pub fn current_policy(&self) -> PolicyId {
        self.shared.lock().policy.id()
    }

    // -------------------------------------------------------------------------
    // Firmware-ack collaborator (MCU devices only)
    // -------------------------------------------------------------------------

    fn mcu_ack(&self, ack: impl FnOnce(&mut McuSm)) -> Result<()> {
        if !self.config.caps.has_mcu {
            return Err(Error::NoMcu);
        }
        let mut shared = self.shared.lock();
        ack(&mut self.mcu.lock());
        self.update_locked(&mut shared)
    }

    /// Firmware finished (re)loading and booting.
    pub fn on_firmware_reloaded(&self) -> Result<()> {
        self.mcu_ack(McuSm::ack_firmware_reloaded)
    }

    /// Firmware acknowledged the global reinit request.
    pub fn on_global_reinit_complete(&self) -> Result<()> {
        self.mcu_ack(McuSm::ack_global_reinit)
    }

    /// Firmware acknowledged the shader core-mask update.
    pub fn on_core_mask_update_complete(&self) -> Result<()> {
        self.mcu_ack(McuSm::ack_core_mask_update)
    }

    /// Firmware confirmed the halt request.
    pub fn on_halt_complete(&self) -> Result<()> {
        self.mcu_ack(McuSm::ack_halt)
    }

    // -------------------------------------------------------------------------
    // Hardware-counter collaborator
    // -------------------------------------------------------------------------

    /// An asynchronous hardware-counter disable finished.
    pub fn on_hwcnt_disable_complete(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.hwcnt_disable_pending = false;
        shared.hwcnt_disabled = true;
        self.update_locked(&mut shared)
    }

    /// Whether counter collection is currently wanted by the machine
    /// that owns it (MCU when present, L2 otherwise). The hwcnt
    /// collaborator consults this when a completion races a new
    /// transition.
    pub fn hwcnt_desired(&self) -> bool {
        self.shared.lock().hwcnt_desired
    }

    // -------------------------------------------------------------------------
    // DVFS governor inputs
    // -------------------------------------------------------------------------

    /// Request a different set of shader cores (DVFS or debugfs). The
    /// mask must be a non-empty subset of the present cores.
    pub fn set_core_mask(&self, mask: CoreMask) -> Result<()> {
        if mask.is_empty() || !mask.is_subset_of(self.config.caps.shader_present) {
            return Err(Error::InvalidCoreMask);
        }
        let mut shared = self.shared.lock();
        shared.requested_core_mask = mask;
        self.update_locked(&mut shared)
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Current L2 machine state.
    pub fn l2_state(&self) -> L2State {
        self.l2.lock().state()
    }

    /// Current MCU machine state, on devices that have one.
    pub fn mcu_state(&self) -> Option<McuState> {
        self.config.caps.has_mcu.then(|| self.mcu.lock().state())
    }

    /// Current shader machine state.
    pub fn shaders_state(&self) -> ShaderState {
        self.shaders.lock().state()
    }

    /// Shader cores currently powered.
    pub fn shaders_avail(&self) -> CoreMask {
        self.shaders.lock().avail()
    }

    /// Shader core mask synchronized with the hwcnt consumer.
    pub fn shaders_sync_mask(&self) -> CoreMask {
        self.shaders.lock().sync_mask()
    }

    /// Remaining hysteresis ticks of a running countdown.
    pub fn hysteresis_remaining(&self) -> u32 {
        self.shaders.lock().timer.remaining()
    }

    /// Permanently degraded after a fatal transition failure.
    pub fn is_degraded(&self) -> bool {
        self.shared.lock().degraded
    }

    /// All machines settled at their desired states.
    pub fn in_desired_state(&self) -> bool {
        let shared = self.shared.lock();
        let l2_ok = {
            let l2 = self.l2.lock();
            if shared.l2_desired {
                l2.is_on()
            } else {
                l2.state() == L2State::Off
            }
        };
        let shaders_ok = {
            let shaders = self.shaders.lock();
            if shared.shaders_desired {
                shaders.state() == ShaderState::OnCorestackOn
                    && shaders.avail() == shared.shaders_desired_mask
            } else {
                shaders.is_off()
            }
        };
        let mcu_ok = if self.config.caps.has_mcu {
            let mcu = self.mcu.lock();
            if shared.mcu_desired {
                mcu.is_on()
            } else {
                mcu.state() == McuState::Off
            }
        } else {
            true
        };
        l2_ok && shaders_ok && mcu_ok
    }
}

impl<H: PmHardware> core::fmt::Debug for PmDevice<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // One lock at a time, device-wide lock first: each guard is a
        // statement temporary, so no two locks are ever held together
        // and the lock hierarchy cannot invert against the evaluator.
        let degraded = self.shared.lock().degraded;
        let l2 = self.l2.lock().state().name();
        let shaders = self.shaders.lock().state().name();
        f.debug_struct("PmDevice")
            .field("l2", &l2)
            .field("shaders", &shaders)
            .field("degraded", &degraded)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
