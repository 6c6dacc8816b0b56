//! # Scheduling MCU State Machine
//!
//! Present only on devices with an on-GPU scheduling microcontroller.
//! Firmware interactions (reload, global reinit, core-mask update,
//! halt) are acknowledged asynchronously: the machine parks in a
//! pending state and is resumed when the firmware-ack collaborator
//! calls back into the device. Reload and halt waits carry a deadline;
//! missing it is fatal.
//!
//! The cross-domain requirement that the L2 is on before the MCU boots
//! is enforced by the coordinator, which passes the upstream state in,
//! not by this machine.

use basalt_core::{CoreMask, CoreType, Error, PmHardware, Result};
use log::{error, trace};

use crate::config::PmConfig;
use crate::device::Shared;
use crate::poll::poll_power_ready;

// =============================================================================
// STATES
// =============================================================================

/// States of the MCU power/boot state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuState {
    /// The MCU is powered off.
    Off,
    /// Firmware is being (re)loaded and booted.
    PendOnReload,
    /// Global configuration sent to firmware, acknowledgment pending.
    OnGlbReinitPend,
    /// Booted; hardware counters being enabled.
    OnHwcntEnable,
    /// Fully operational.
    On,
    /// An updated shader core mask is being forwarded to firmware.
    OnCoreMaskUpdatePend,
    /// Hardware counters being disabled ahead of a halt.
    OnHwcntDisable,
    /// Halt request about to be sent.
    OnHalt,
    /// Halt requested, firmware confirmation pending.
    OnPendHalt,
    /// Halted; the MCU core is about to be disabled.
    PowerDown,
    /// Disable issued, waiting for the core to report off.
    PendOff,
    /// Device reset in progress; MCU state unknown.
    ResetWait,
}

impl McuState {
    /// State name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::PendOnReload => "PEND_ON_RELOAD",
            Self::OnGlbReinitPend => "ON_GLB_REINIT_PEND",
            Self::OnHwcntEnable => "ON_HWCNT_ENABLE",
            Self::On => "ON",
            Self::OnCoreMaskUpdatePend => "ON_CORE_MASK_UPDATE_PEND",
            Self::OnHwcntDisable => "ON_HWCNT_DISABLE",
            Self::OnHalt => "ON_HALT",
            Self::OnPendHalt => "ON_PEND_HALT",
            Self::PowerDown => "POWER_DOWN",
            Self::PendOff => "PEND_OFF",
            Self::ResetWait => "RESET_WAIT",
        }
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// The MCU state machine for one device.
#[derive(Debug)]
pub struct McuSm {
    state: McuState,
    /// Shader core mask last communicated to firmware.
    enabled_mask: CoreMask,
    /// Deadline (absolute ns) for the acknowledgment currently awaited.
    ack_deadline_ns: Option<u64>,
    fw_reload_done: bool,
    glb_reinit_done: bool,
    core_mask_done: bool,
    halt_done: bool,
    transitions: u64,
}

impl McuSm {
    pub(crate) const fn new() -> Self {
        Self {
            state: McuState::Off,
            enabled_mask: CoreMask::EMPTY,
            ack_deadline_ns: None,
            fw_reload_done: false,
            glb_reinit_done: false,
            core_mask_done: false,
            halt_done: false,
            transitions: 0,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> McuState {
        self.state
    }

    /// Operational and able to schedule work.
    #[inline]
    pub fn is_on(&self) -> bool {
        self.state == McuState::On
    }

    /// Number of state transitions since attach.
    #[inline]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Shader core mask as last acknowledged by firmware.
    #[inline]
    pub fn enabled_mask(&self) -> CoreMask {
        self.enabled_mask
    }

    fn set_state(&mut self, next: McuState) {
        trace!("pm mcu: {} -> {}", self.state.name(), next.name());
        self.state = next;
        self.transitions += 1;
    }

    fn clear_acks(&mut self) {
        self.ack_deadline_ns = None;
        self.fw_reload_done = false;
        self.glb_reinit_done = false;
        self.core_mask_done = false;
        self.halt_done = false;
    }

    pub(crate) fn enter_reset(&mut self) {
        self.clear_acks();
        self.set_state(McuState::ResetWait);
    }

    pub(crate) fn reset_complete(&mut self) {
        self.clear_acks();
        self.enabled_mask = CoreMask::EMPTY;
        self.set_state(McuState::Off);
    }

    // -------------------------------------------------------------------------
    // Firmware acknowledgment entry points (forwarded by the device)
    // -------------------------------------------------------------------------

    pub(crate) fn ack_firmware_reloaded(&mut self) {
        self.fw_reload_done = true;
    }

    pub(crate) fn ack_global_reinit(&mut self) {
        self.glb_reinit_done = true;
    }

    pub(crate) fn ack_core_mask_update(&mut self) {
        self.core_mask_done = true;
    }

    pub(crate) fn ack_halt(&mut self) {
        self.halt_done = true;
    }

    /// Check the deadline of an awaited acknowledgment.
    fn deadline_exceeded<H: PmHardware>(&self, hw: &H) -> bool {
        match self.ack_deadline_ns {
            Some(deadline) => hw.time_ns() > deadline,
            None => false,
        }
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
        match self.state {
            McuState::Off => {
                if shared.mcu_desired && l2_on {
                    hw.firmware_reload();
                    self.fw_reload_done = false;
                    self.ack_deadline_ns = Some(hw.time_ns() + cfg.ack_budget_ns);
                    self.set_state(McuState::PendOnReload);
                    return Ok(true);
                }
                Ok(false)
            }

            McuState::PendOnReload => {
                if self.fw_reload_done {
                    self.ack_deadline_ns = None;
                    hw.firmware_global_reinit();
                    self.glb_reinit_done = false;
                    self.set_state(McuState::OnGlbReinitPend);
                    return Ok(true);
                }
                if self.deadline_exceeded(hw) {
                    error!("pm mcu: firmware boot acknowledgment deadline exceeded");
                    return Err(Error::AckTimeout { domain: CoreType::Mcu });
                }
                Ok(false)
            }

            McuState::OnGlbReinitPend => {
                if self.glb_reinit_done {
                    self.set_state(McuState::OnHwcntEnable);
                    return Ok(true);
                }
                Ok(false)
            }

            McuState::OnHwcntEnable => {
                hw.hwcnt_enable();
                shared.hwcnt_desired = true;
                shared.hwcnt_disabled = false;
                self.enabled_mask = shared.shaders_desired_mask;
                self.set_state(McuState::On);
                Ok(true)
            }

            McuState::On => {
                if !shared.mcu_desired {
                    shared.hwcnt_desired = false;
                    self.set_state(McuState::OnHwcntDisable);
                    return Ok(true);
                }
                if shared.shaders_desired && shared.shaders_desired_mask != self.enabled_mask {
                    hw.firmware_update_core_mask(shared.shaders_desired_mask);
                    self.core_mask_done = false;
                    self.set_state(McuState::OnCoreMaskUpdatePend);
                    return Ok(true);
                }
                Ok(false)
            }

            McuState::OnCoreMaskUpdatePend => {
                if self.core_mask_done {
                    self.enabled_mask = shared.shaders_desired_mask;
                    self.set_state(McuState::On);
                    return Ok(true);
                }
                Ok(false)
            }

            McuState::OnHwcntDisable => {
                if shared.mcu_desired {
                    // Demand came back before the halt was issued.
                    self.set_state(McuState::OnHwcntEnable);
                    return Ok(true);
                }
                if !shared.hwcnt_disabled {
                    if shared.hwcnt_disable_pending {
                        return Ok(false);
                    }
                    if !hw.hwcnt_disable() {
                        shared.hwcnt_disable_pending = true;
                        return Ok(false);
                    }
                    shared.hwcnt_disabled = true;
                }
                self.set_state(McuState::OnHalt);
                Ok(true)
            }

            McuState::OnHalt => {
                hw.firmware_halt();
                self.halt_done = false;
                self.ack_deadline_ns = Some(hw.time_ns() + cfg.ack_budget_ns);
                self.set_state(McuState::OnPendHalt);
                Ok(true)
            }

            McuState::OnPendHalt => {
                if self.halt_done {
                    self.ack_deadline_ns = None;
                    self.set_state(McuState::PowerDown);
                    return Ok(true);
                }
                if self.deadline_exceeded(hw) {
                    error!("pm mcu: halt acknowledgment deadline exceeded");
                    return Err(Error::AckTimeout { domain: CoreType::Mcu });
                }
                Ok(false)
            }

            McuState::PowerDown => {
                hw.firmware_disable();
                self.set_state(McuState::PendOff);
                Ok(true)
            }

            McuState::PendOff => {
                if !poll_power_ready(hw, CoreType::Mcu, CoreMask::EMPTY, cfg.poll_retries) {
                    error!("pm mcu: power-off readiness poll timed out");
                    return Err(Error::PollTimeout { domain: CoreType::Mcu });
                }
                self.enabled_mask = CoreMask::EMPTY;
                self.set_state(McuState::Off);
                Ok(true)
            }

            McuState::ResetWait => Ok(false),
        }
    }
}

// =============================================================================
// COMPILE-TIME CHECKS
// =============================================================================

static_assertions::assert_eq_size!(McuState, u8);
