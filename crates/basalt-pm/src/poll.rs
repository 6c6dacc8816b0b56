//! Bounded register polling.
//!
//! Readiness polls are busy-waits with a hard iteration budget. The
//! budget is configuration, not policy: callers decide what exhausting
//! it means, and for power transitions that is always fatal, since a
//! timed-out transition leaves the hardware state ambiguous.

use basalt_core::{CoreMask, CoreType, PmHardware};

/// Poll until `domain` reports exactly `want` ready and no transition
/// pending. Returns false once `retries` iterations are exhausted.
pub(crate) fn poll_power_ready<H: PmHardware>(
    hw: &H,
    domain: CoreType,
    want: CoreMask,
    retries: u32,
) -> bool {
    for _ in 0..retries {
        if hw.read_power_ready(domain) == want && !hw.read_transition_pending(domain) {
            return true;
        }
        core::hint::spin_loop();
    }
    false
}

/// Poll for completion of a previously started L2 flush.
pub(crate) fn poll_flush_complete<H: PmHardware>(hw: &H, retries: u32) -> bool {
    for _ in 0..retries {
        if hw.cache_flush_complete() {
            return true;
        }
        core::hint::spin_loop();
    }
    false
}
