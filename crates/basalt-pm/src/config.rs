//! # Engine Configuration
//!
//! Probe-time configuration for the power engine, in the spirit of a
//! platform capability block: everything here is decided once at device
//! attach and never changes afterwards.

use basalt_core::HwCaps;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Static configuration of the power engine for one device.
#[derive(Debug, Clone, Copy)]
pub struct PmConfig {
    /// Hardware topology and capabilities discovered at probe.
    pub caps: HwCaps,
    /// Maximum iterations of a register readiness poll before the
    /// transition is declared wedged (fatal).
    pub poll_retries: u32,
    /// Deadline for asynchronous firmware acknowledgments, in
    /// nanoseconds. Exceeding it is fatal.
    pub ack_budget_ns: u64,
    /// Hysteresis ticks to wait after shader demand drops before the
    /// cores are actually powered down. Zero disables the hysteresis.
    pub hysteresis_ticks: u32,
    /// Slow the GPU clock around L2 power cycles (errata workaround).
    /// When clear, the clock sub-states forward without hardware work.
    pub clock_slow_down_wa: bool,
    /// Never power the L2 down once it is up.
    pub l2_always_on: bool,
}

impl Default for PmConfig {
    fn default() -> Self {
        Self {
            caps: HwCaps::default(),
            poll_retries: 4096,
            ack_budget_ns: 500_000_000,
            hysteresis_ticks: 2,
            clock_slow_down_wa: false,
            l2_always_on: false,
        }
    }
}
