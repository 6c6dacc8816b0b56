//! # Hardware Collaborator Interface
//!
//! The single capability trait through which the power engine reaches
//! real hardware: power-request registers, the hardware-counter block,
//! the MCU firmware mailbox, the L2 flush unit and the clock tree.
//!
//! The engine never touches a register directly. A platform supplies a
//! [`PmHardware`] implementation at device construction; tests supply a
//! scripted mock. All methods are expected to be non-blocking: anything
//! that takes hardware time is started here and completed either by a
//! later poll (`read_power_ready`, `cache_flush_complete`) or by an
//! acknowledgment callback into the device (`on_*` methods of the
//! engine's device type).

use crate::types::{CoreMask, CoreType};

// =============================================================================
// HARDWARE TRAIT
// =============================================================================

/// Injected hardware capability for the power engine.
pub trait PmHardware {
    // -------------------------------------------------------------------------
    // Register I/O
    // -------------------------------------------------------------------------

    /// Issue a power request for `domain`: cores in `mask` should be
    /// powered, all others in the domain powered off.
    fn write_power_request(&self, domain: CoreType, mask: CoreMask);

    /// Read back the mask of cores currently powered and ready.
    fn read_power_ready(&self, domain: CoreType) -> CoreMask;

    /// True while any core of `domain` is still transitioning.
    fn read_transition_pending(&self, domain: CoreType) -> bool;

    // -------------------------------------------------------------------------
    // Hardware counters
    // -------------------------------------------------------------------------

    /// Enable hardware-counter collection. Synchronous.
    fn hwcnt_enable(&self);

    /// Begin disabling hardware-counter collection.
    ///
    /// Returns `true` if the disable completed synchronously. When it
    /// returns `false` the collaborator later reports completion through
    /// the engine's hwcnt-disable callback.
    fn hwcnt_disable(&self) -> bool;

    // -------------------------------------------------------------------------
    // MCU firmware mailbox (devices with a scheduling microcontroller)
    // -------------------------------------------------------------------------

    /// Start a (re)load and boot of the MCU firmware.
    fn firmware_reload(&self);

    /// Send the global configuration/reinit request to firmware.
    fn firmware_global_reinit(&self);

    /// Forward an updated shader core mask to firmware.
    fn firmware_update_core_mask(&self, mask: CoreMask);

    /// Ask the firmware to halt and quiesce the MCU.
    fn firmware_halt(&self);

    /// Turn the halted MCU off.
    fn firmware_disable(&self);

    // -------------------------------------------------------------------------
    // L2 flush
    // -------------------------------------------------------------------------

    /// Start an L2 cache flush.
    fn cache_flush_start(&self);

    /// Poll whether the flush started by [`Self::cache_flush_start`]
    /// has completed.
    fn cache_flush_complete(&self) -> bool;

    // -------------------------------------------------------------------------
    // Clock control (errata workaround path)
    // -------------------------------------------------------------------------

    /// Slow the GPU clock down for a safe L2 power cycle, or restore it.
    ///
    /// Only called when the clock-slowdown workaround is configured.
    fn set_clock_slowdown(&self, slow: bool);

    // -------------------------------------------------------------------------
    // Time
    // -------------------------------------------------------------------------

    /// Monotonic time in nanoseconds, used by the metrics sampler and
    /// for acknowledgment deadlines.
    fn time_ns(&self) -> u64;
}

// =============================================================================
// HARDWARE CAPABILITIES
// =============================================================================

/// Static description of the managed device, as discovered at probe.
#[derive(Debug, Clone, Copy)]
pub struct HwCaps {
    /// Shader cores physically present.
    pub shader_present: CoreMask,
    /// Core stacks physically present.
    pub stack_present: CoreMask,
    /// L2 slices physically present.
    pub l2_present: CoreMask,
    /// Whether the device carries a scheduling microcontroller.
    pub has_mcu: bool,
}

impl Default for HwCaps {
    fn default() -> Self {
        Self {
            shader_present: CoreMask::first(4),
            stack_present: CoreMask::first(1),
            l2_present: CoreMask::first(1),
            has_mcu: false,
        }
    }
}
