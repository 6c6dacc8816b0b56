//! # L2 Cache / Tiler State Machine
//!
//! The L2 block gates everything downstream: shader cores may only
//! power on once the L2 is fully on, and the L2 may only leave its on
//! state once the shaders are fully off, no protected-mode transition
//! is pending and no cycle-counter user holds it.
//!
//! Hardware-counter sub-states belong to this machine only on devices
//! without a scheduling MCU; with an MCU present the MCU machine owns
//! the counters and the hwcnt sub-states here forward without hardware
//! work. The clock sub-states exist for an errata workaround and are
//! entered only when it is configured.

use basalt_core::{CoreMask, CoreType, Error, PmHardware, Result};
use log::{error, trace};

use crate::config::PmConfig;
use crate::device::Shared;
use crate::poll::poll_power_ready;

// =============================================================================
// STATES
// =============================================================================

/// States of the L2 cache & tiler power state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2State {
    /// The L2 cache and tiler are off.
    Off,
    /// Power-on requested, waiting for the ready mask.
    PendOn,
    /// Restoring the GPU clock after a slowed-down power-on.
    RestoreClocks,
    /// On, hardware counters being enabled.
    OnHwcntEnable,
    /// On, hardware counters enabled.
    On,
    /// On, hardware counters being disabled ahead of power-down.
    OnHwcntDisable,
    /// Slowing the GPU clock for a safe power cycle.
    SlowDownClocks,
    /// About to issue the power-off request.
    PowerDown,
    /// Power-off requested, waiting for the cores to report off.
    PendOff,
    /// Device reset in progress; power state unknown.
    ResetWait,
}

impl L2State {
    /// State name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::PendOn => "PEND_ON",
            Self::RestoreClocks => "RESTORE_CLOCKS",
            Self::OnHwcntEnable => "ON_HWCNT_ENABLE",
            Self::On => "ON",
            Self::OnHwcntDisable => "ON_HWCNT_DISABLE",
            Self::SlowDownClocks => "SLOW_DOWN_CLOCKS",
            Self::PowerDown => "POWER_DOWN",
            Self::PendOff => "PEND_OFF",
            Self::ResetWait => "RESET_WAIT",
        }
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// The L2 power state machine for one device.
#[derive(Debug)]
pub struct L2Sm {
    state: L2State,
    /// Guard against double-issuing a hardware power request.
    request_in_flight: bool,
    transitions: u64,
}

impl L2Sm {
    pub(crate) const fn new() -> Self {
        Self {
            state: L2State::Off,
            request_in_flight: false,
            transitions: 0,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> L2State {
        self.state
    }

    /// Fully on: downstream domains may power up.
    #[inline]
    pub fn is_on(&self) -> bool {
        self.state == L2State::On
    }

    /// Number of state transitions since attach.
    #[inline]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    fn set_state(&mut self, next: L2State) {
        trace!("pm l2: {} -> {}", self.state.name(), next.name());
        self.state = next;
        self.transitions += 1;
    }

    pub(crate) fn enter_reset(&mut self) {
        self.request_in_flight = false;
        self.set_state(L2State::ResetWait);
    }

    pub(crate) fn reset_complete(&mut self) {
        self.request_in_flight = false;
        self.set_state(L2State::Off);
    }

    /// Whether the L2 must currently be held on, regardless of the
    /// policy's own desire.
    fn needed(shared: &Shared, cfg: &PmConfig) -> bool {
        shared.l2_desired
            || cfg.l2_always_on
            || shared.protected_override
            || shared.cycle_counter_requests > 0
            || !shared.shaders_off
            || !shared.mcu_off
    }

    /// Advance the machine by at most one step.
    ///
    /// Returns `Ok(true)` when the state changed and another evaluation
    /// pass is worthwhile, `Ok(false)` when the machine is settled or
    /// parked on an external event.
    pub(crate) fn step<H: PmHardware>(
        &mut self,
        shared: &mut Shared,
        hw: &H,
        cfg: &PmConfig,
    ) -> Result<bool> {
        let owns_hwcnt = !cfg.caps.has_mcu;

        match self.state {
            L2State::Off => {
                if Self::needed(shared, cfg) && !self.request_in_flight {
                    hw.write_power_request(CoreType::L2, cfg.caps.l2_present);
                    self.request_in_flight = true;
                    self.set_state(L2State::PendOn);
                    return Ok(true);
                }
                Ok(false)
            }

            L2State::PendOn => {
                // The ready mask must reach the full present mask; a
                // partial L2 is not a usable cache.
                if !poll_power_ready(hw, CoreType::L2, cfg.caps.l2_present, cfg.poll_retries) {
                    error!("pm l2: power-on readiness poll timed out");
                    return Err(Error::PollTimeout { domain: CoreType::L2 });
                }
                self.request_in_flight = false;
                if cfg.clock_slow_down_wa {
                    self.set_state(L2State::RestoreClocks);
                } else {
                    self.set_state(L2State::OnHwcntEnable);
                }
                Ok(true)
            }

            L2State::RestoreClocks => {
                hw.set_clock_slowdown(false);
                self.set_state(L2State::OnHwcntEnable);
                Ok(true)
            }

            L2State::OnHwcntEnable => {
                if owns_hwcnt {
                    hw.hwcnt_enable();
                    shared.hwcnt_desired = true;
                    shared.hwcnt_disabled = false;
                }
                self.set_state(L2State::On);
                Ok(true)
            }

            L2State::On => {
                if Self::needed(shared, cfg) {
                    return Ok(false);
                }
                if owns_hwcnt {
                    shared.hwcnt_desired = false;
                }
                self.set_state(L2State::OnHwcntDisable);
                Ok(true)
            }

            L2State::OnHwcntDisable => {
                // A renewed need for the L2 cancels the power-down
                // before any hardware request has been issued.
                if Self::needed(shared, cfg) {
                    self.set_state(L2State::OnHwcntEnable);
                    return Ok(true);
                }
                if owns_hwcnt && !shared.hwcnt_disabled {
                    if shared.hwcnt_disable_pending {
                        return Ok(false);
                    }
                    if !hw.hwcnt_disable() {
                        shared.hwcnt_disable_pending = true;
                        return Ok(false);
                    }
                    shared.hwcnt_disabled = true;
                }
                if cfg.clock_slow_down_wa {
                    self.set_state(L2State::SlowDownClocks);
                } else {
                    self.set_state(L2State::PowerDown);
                }
                Ok(true)
            }

            L2State::SlowDownClocks => {
                hw.set_clock_slowdown(true);
                self.set_state(L2State::PowerDown);
                Ok(true)
            }

            L2State::PowerDown => {
                // Counter state must be safe before the rails drop;
                // this is guaranteed by the hwcnt sub-state above.
                if !self.request_in_flight {
                    hw.write_power_request(CoreType::L2, CoreMask::EMPTY);
                    self.request_in_flight = true;
                }
                self.set_state(L2State::PendOff);
                Ok(true)
            }

            L2State::PendOff => {
                if !poll_power_ready(hw, CoreType::L2, CoreMask::EMPTY, cfg.poll_retries) {
                    error!("pm l2: power-off readiness poll timed out");
                    return Err(Error::PollTimeout { domain: CoreType::L2 });
                }
                self.request_in_flight = false;
                self.set_state(L2State::Off);
                Ok(true)
            }

            L2State::ResetWait => Ok(false),
        }
    }
}

// =============================================================================
// COMPILE-TIME CHECKS
// =============================================================================

static_assertions::assert_eq_size!(L2State, u8);
