//! # Shader-Core State Machine
//!
//! Governs the shader core array and the core-stack rails beneath it.
//! Supports partial power changes: the desired mask may grow or shrink
//! a subset of the running cores without a full off/on cycle, with the
//! available mask converging one register pass at a time.
//!
//! Power-down is deliberately slow: demand dropping arms a hysteresis
//! tick timer, and only after it expires (and any in-flight jobs have
//! drained, and the L2 has been flushed) are the cores actually turned
//! off. Renewed demand anywhere before the commit point cancels the
//! descent without touching hardware.

use basalt_core::{CoreMask, CoreType, Error, PmHardware, Result};
use log::{error, trace};

use crate::config::PmConfig;
use crate::device::Shared;
use crate::poll::{poll_flush_complete, poll_power_ready};
use crate::tick::TickTimer;

// =============================================================================
// STATES
// =============================================================================

/// States of the shader-core power state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderState {
    /// Shaders and core stacks are off.
    OffCorestackOff,
    /// Core stacks requested on, shaders still off.
    OffCorestackPendOn,
    /// Stacks on; shaders requested on, readiness pending.
    PendOnCorestackOn,
    /// Shaders and stacks on.
    OnCorestackOn,
    /// On, re-checking whether the available mask still matches demand.
    OnCorestackOnRecheck,
    /// Demand dropped; cores stay on for the hysteresis countdown.
    WaitOffCorestackOn,
    /// Partial power-down parked until in-flight jobs drain.
    WaitGpuIdle,
    /// Hysteresis expired; waiting for remaining jobs to finish.
    WaitFinishedCorestackOn,
    /// L2 flush in progress ahead of the power-down.
    L2FlushingCorestackOn,
    /// Flush done; ready to issue the power-off request.
    ReadyOffCorestackOn,
    /// Shader power-off requested, readiness pending.
    PendOffCorestackOn,
    /// Shaders off; core stacks requested off.
    OffCorestackPendOff,
    /// All rails off; a queued timer cancellation is still draining.
    OffCorestackOffTimerPendOff,
    /// Device reset in progress; power state unknown.
    ResetWait,
}

impl ShaderState {
    /// State name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::OffCorestackOff => "OFF_CORESTACK_OFF",
            Self::OffCorestackPendOn => "OFF_CORESTACK_PEND_ON",
            Self::PendOnCorestackOn => "PEND_ON_CORESTACK_ON",
            Self::OnCorestackOn => "ON_CORESTACK_ON",
            Self::OnCorestackOnRecheck => "ON_CORESTACK_ON_RECHECK",
            Self::WaitOffCorestackOn => "WAIT_OFF_CORESTACK_ON",
            Self::WaitGpuIdle => "WAIT_GPU_IDLE",
            Self::WaitFinishedCorestackOn => "WAIT_FINISHED_CORESTACK_ON",
            Self::L2FlushingCorestackOn => "L2_FLUSHING_CORESTACK_ON",
            Self::ReadyOffCorestackOn => "READY_OFF_CORESTACK_ON",
            Self::PendOffCorestackOn => "PEND_OFF_CORESTACK_ON",
            Self::OffCorestackPendOff => "OFF_CORESTACK_PEND_OFF",
            Self::OffCorestackOffTimerPendOff => "OFF_CORESTACK_OFF_TIMER_PEND_OFF",
            Self::ResetWait => "RESET_WAIT",
        }
    }

    /// True while any shader core is (or may be) powered.
    pub const fn cores_powered(self) -> bool {
        matches!(
            self,
            Self::OnCorestackOn
                | Self::OnCorestackOnRecheck
                | Self::WaitOffCorestackOn
                | Self::WaitGpuIdle
                | Self::WaitFinishedCorestackOn
                | Self::L2FlushingCorestackOn
                | Self::ReadyOffCorestackOn
        )
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// The shader-core power state machine for one device.
#[derive(Debug)]
pub struct ShaderSm {
    state: ShaderState,
    /// Cores currently powered (converges toward the desired mask).
    avail: CoreMask,
    /// Core mask as visible to the hardware-counter consumer; only
    /// updated when the machine settles in its on state.
    sync_mask: CoreMask,
    /// A shrink of already-on cores is in progress.
    partial_off: bool,
    /// Hysteresis countdown for the delayed power-down.
    pub(crate) timer: TickTimer,
    transitions: u64,
}

impl ShaderSm {
    pub(crate) const fn new(hysteresis_ticks: u32) -> Self {
        Self {
            state: ShaderState::OffCorestackOff,
            avail: CoreMask::EMPTY,
            sync_mask: CoreMask::EMPTY,
            partial_off: false,
            timer: TickTimer::new(hysteresis_ticks),
            transitions: 0,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> ShaderState {
        self.state
    }

    /// Cores currently powered.
    #[inline]
    pub fn avail(&self) -> CoreMask {
        self.avail
    }

    /// Core mask synchronized with the hardware-counter consumer.
    #[inline]
    pub fn sync_mask(&self) -> CoreMask {
        self.sync_mask
    }

    /// Fully off, stacks included.
    #[inline]
    pub fn is_off(&self) -> bool {
        self.state == ShaderState::OffCorestackOff
    }

    /// Number of state transitions since attach.
    #[inline]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    fn set_state(&mut self, next: ShaderState) {
        trace!("pm shaders: {} -> {}", self.state.name(), next.name());
        self.state = next;
        self.transitions += 1;
    }

    pub(crate) fn enter_reset(&mut self) {
        self.timer.cancel();
        self.partial_off = false;
        self.set_state(ShaderState::ResetWait);
    }

    pub(crate) fn reset_complete(&mut self) {
        self.timer.reset();
        self.avail = CoreMask::EMPTY;
        self.sync_mask = CoreMask::EMPTY;
        self.partial_off = false;
        self.set_state(ShaderState::OffCorestackOff);
    }

    /// Begin the hysteresis descent. With a zero tick budget the timer
    /// is considered already expired and the descent commits on the
    /// next step.
    fn arm_hysteresis(&mut self, cfg: &PmConfig) {
        if cfg.hysteresis_ticks > 0 {
            self.timer.arm();
        }
        self.set_state(ShaderState::WaitOffCorestackOn);
    }

    /// Advance the machine by at most one step. `l2_on` is the upstream
    /// gate computed by the coordinator.
    pub(crate) fn step<H: PmHardware>(
        &mut self,
        shared: &mut Shared,
        l2_on: bool,
        hw: &H,
        cfg: &PmConfig,
    ) -> Result<bool> {
        let desired = shared.shaders_desired;
        let desired_mask = shared.shaders_desired_mask.clamp_to(cfg.caps.shader_present);

        match self.state {
            ShaderState::OffCorestackOff => {
                if desired && l2_on {
                    hw.write_power_request(CoreType::Stack, cfg.caps.stack_present);
                    self.set_state(ShaderState::OffCorestackPendOn);
                    return Ok(true);
                }
                Ok(false)
            }

            ShaderState::OffCorestackPendOn => {
                if !poll_power_ready(hw, CoreType::Stack, cfg.caps.stack_present, cfg.poll_retries)
                {
                    error!("pm shaders: core stack power-on poll timed out");
                    return Err(Error::PollTimeout { domain: CoreType::Stack });
                }
                hw.write_power_request(CoreType::Shader, desired_mask);
                self.avail = desired_mask;
                self.set_state(ShaderState::PendOnCorestackOn);
                Ok(true)
            }

            ShaderState::PendOnCorestackOn => {
                if !poll_power_ready(hw, CoreType::Shader, self.avail, cfg.poll_retries) {
                    error!("pm shaders: shader power transition poll timed out");
                    return Err(Error::PollTimeout { domain: CoreType::Shader });
                }
                self.sync_mask = self.avail;
                self.set_state(ShaderState::OnCorestackOn);
                Ok(true)
            }

            ShaderState::OnCorestackOn => {
                if !desired {
                    self.arm_hysteresis(cfg);
                    return Ok(true);
                }
                if desired_mask != self.avail {
                    self.set_state(ShaderState::OnCorestackOnRecheck);
                    return Ok(true);
                }
                Ok(false)
            }

            ShaderState::OnCorestackOnRecheck => {
                if !desired {
                    self.arm_hysteresis(cfg);
                    return Ok(true);
                }
                let to_add = desired_mask - self.avail;
                if !to_add.is_empty() {
                    // Grow first; a mixed change shrinks on a later pass.
                    let grown = self.avail | desired_mask;
                    hw.write_power_request(CoreType::Shader, grown);
                    self.avail = grown;
                    self.set_state(ShaderState::PendOnCorestackOn);
                    return Ok(true);
                }
                let to_remove = self.avail - desired_mask;
                if !to_remove.is_empty() {
                    self.partial_off = true;
                    self.set_state(ShaderState::WaitGpuIdle);
                    return Ok(true);
                }
                self.set_state(ShaderState::OnCorestackOn);
                Ok(true)
            }

            ShaderState::WaitOffCorestackOn => {
                if desired {
                    // Renewed demand cancels the descent; the cores
                    // never left their on state.
                    self.timer.cancel();
                    self.set_state(ShaderState::OnCorestackOn);
                    return Ok(true);
                }
                if self.timer.expired() {
                    self.set_state(ShaderState::WaitFinishedCorestackOn);
                    return Ok(true);
                }
                Ok(false)
            }

            ShaderState::WaitGpuIdle => {
                if desired && desired_mask == self.avail {
                    // Demand grew back to the running mask; nothing to
                    // shrink after all.
                    self.partial_off = false;
                    self.set_state(ShaderState::OnCorestackOn);
                    return Ok(true);
                }
                if shared.active_jobs == 0 {
                    hw.cache_flush_start();
                    self.set_state(ShaderState::L2FlushingCorestackOn);
                    return Ok(true);
                }
                Ok(false)
            }

            ShaderState::WaitFinishedCorestackOn => {
                if desired {
                    self.set_state(ShaderState::OnCorestackOn);
                    return Ok(true);
                }
                if shared.active_jobs == 0 {
                    hw.cache_flush_start();
                    self.set_state(ShaderState::L2FlushingCorestackOn);
                    return Ok(true);
                }
                Ok(false)
            }

            ShaderState::L2FlushingCorestackOn => {
                if !poll_flush_complete(hw, cfg.poll_retries) {
                    error!("pm shaders: L2 flush completion poll timed out");
                    return Err(Error::PollTimeout { domain: CoreType::L2 });
                }
                self.set_state(ShaderState::ReadyOffCorestackOn);
                Ok(true)
            }

            ShaderState::ReadyOffCorestackOn => {
                if self.partial_off {
                    hw.write_power_request(CoreType::Shader, desired_mask);
                    self.avail = desired_mask;
                    self.partial_off = false;
                    self.set_state(ShaderState::PendOnCorestackOn);
                } else {
                    hw.write_power_request(CoreType::Shader, CoreMask::EMPTY);
                    self.avail = CoreMask::EMPTY;
                    self.set_state(ShaderState::PendOffCorestackOn);
                }
                Ok(true)
            }

            ShaderState::PendOffCorestackOn => {
                if !poll_power_ready(hw, CoreType::Shader, CoreMask::EMPTY, cfg.poll_retries) {
                    error!("pm shaders: shader power-off poll timed out");
                    return Err(Error::PollTimeout { domain: CoreType::Shader });
                }
                hw.write_power_request(CoreType::Stack, CoreMask::EMPTY);
                self.set_state(ShaderState::OffCorestackPendOff);
                Ok(true)
            }

            ShaderState::OffCorestackPendOff => {
                if !poll_power_ready(hw, CoreType::Stack, CoreMask::EMPTY, cfg.poll_retries) {
                    error!("pm shaders: core stack power-off poll timed out");
                    return Err(Error::PollTimeout { domain: CoreType::Stack });
                }
                self.sync_mask = CoreMask::EMPTY;
                self.set_state(ShaderState::OffCorestackOffTimerPendOff);
                Ok(true)
            }

            ShaderState::OffCorestackOffTimerPendOff => {
                if self.timer.cancel_queued() {
                    // Let the queued tick run as its no-op first.
                    return Ok(false);
                }
                self.set_state(ShaderState::OffCorestackOff);
                Ok(true)
            }

            ShaderState::ResetWait => Ok(false),
        }
    }
}

// =============================================================================
// COMPILE-TIME CHECKS
// =============================================================================

static_assertions::assert_eq_size!(ShaderState, u8);
