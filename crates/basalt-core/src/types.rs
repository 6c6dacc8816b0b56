//! # BASALT Core Types
//!
//! Fundamental type definitions shared across the power engine.
//!
//! These types provide:
//! - Strong typing for sets of physical cores ([`CoreMask`])
//! - Identification of register-request domains ([`CoreType`])
//! - Policy and job-slot identifiers

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};

// =============================================================================
// CORE MASK
// =============================================================================

/// A set of physical core identifiers, one bit per core.
///
/// Used both for the shader core array and for the core-stack rails
/// beneath it. A mask is always interpreted relative to some "present"
/// mask; the engine maintains the invariant `desired ⊆ present`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct CoreMask(u64);

impl CoreMask {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Create a mask from raw bits.
    #[inline]
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    /// Create a mask with the lowest `n` cores set.
    #[inline]
    pub const fn first(n: u32) -> Self {
        if n == 0 {
            Self(0)
        } else if n >= 64 {
            Self(u64::MAX)
        } else {
            Self((1u64 << n) - 1)
        }
    }

    /// Raw bit representation.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Check for the empty set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of cores in the set.
    #[inline]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// True if every core of `self` is also in `other`.
    #[inline]
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Cores in `self` but not in `other`.
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Restrict to the given present mask.
    #[inline]
    pub const fn clamp_to(self, present: Self) -> Self {
        Self(self.0 & present.0)
    }
}

impl BitOr for CoreMask {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CoreMask {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CoreMask {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Sub for CoreMask {
    type Output = Self;

    /// Set difference.
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.difference(rhs)
    }
}

impl Not for CoreMask {
    type Output = Self;

    #[inline]
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for CoreMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreMask(0x{:016x})", self.0)
    }
}

impl fmt::Display for CoreMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

// =============================================================================
// CORE TYPE
// =============================================================================

/// The independently power-requestable blocks of the GPU.
///
/// These are the domains accepted by the register-I/O collaborator's
/// power-request and readiness interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreType {
    /// The shared L2 cache and tiler block.
    L2,
    /// The shader core array.
    Shader,
    /// The core stacks (power rails beneath groups of shader cores).
    Stack,
    /// The scheduling microcontroller, on devices that have one.
    Mcu,
}

impl CoreType {
    /// Short name used in log output.
    pub const fn name(self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Shader => "shader",
            Self::Stack => "stack",
            Self::Mcu => "mcu",
        }
    }
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// POLICY ID
// =============================================================================

/// Identifier for a power policy.
///
/// Ids are stable and used purely for selection and debugging; the
/// ordering carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyId {
    /// Power cores up and down to mirror demand, no extra hysteresis.
    CoarseDemand,
    /// Keep everything powered while the device is in use.
    AlwaysOn,
    /// Debug variant: device always active, shaders follow demand.
    #[cfg(feature = "always-on-demand")]
    AlwaysOnDemand,
}

// =============================================================================
// JOB SLOT
// =============================================================================

/// Job-slot index used by the metrics sampler's activity accounting.
///
/// The scheduler reports per-slot activity; the sampler only needs a
/// bounded index, not the scheduler's own slot bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct JobSlot(u8);

impl JobSlot {
    /// Number of slots tracked by the sampler.
    pub const COUNT: usize = 4;

    /// Create a slot index. Out-of-range values fold onto the last slot.
    #[inline]
    pub const fn new(index: u8) -> Self {
        if index as usize >= Self::COUNT {
            Self((Self::COUNT - 1) as u8)
        } else {
            Self(index)
        }
    }

    /// Index into per-slot arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// SCHEDULER FLAGS
// =============================================================================

bitflags::bitflags! {
    /// Dynamic power-management flags a policy hands to the job
    /// scheduler.
    ///
    /// The scheduler consults these when deciding whether idle groups
    /// may be suspended; the engine itself only stores and republishes
    /// them on policy activation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PmSchedFlags: u32 {
        /// Keep the compute-unit core powered at all times.
        const CORE_KEEP_ON = 1 << 0;
        /// Do not suspend scheduling groups that go idle.
        const SCHED_IGNORE_IDLE = 1 << 1;
        /// Never suspend the scheduler, even with no runnable groups.
        const SCHED_NO_SUSPEND = 1 << 2;
    }
}

// =============================================================================
// COMPILE-TIME CHECKS
// =============================================================================

static_assertions::assert_eq_size!(CoreMask, u64);
static_assertions::assert_eq_size!(JobSlot, u8);

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_first_edges() {
        assert_eq!(CoreMask::first(0), CoreMask::EMPTY);
        assert_eq!(CoreMask::first(1).bits(), 0b1);
        assert_eq!(CoreMask::first(4).bits(), 0b1111);
        assert_eq!(CoreMask::first(64).bits(), u64::MAX);
        assert_eq!(CoreMask::first(80).bits(), u64::MAX);
    }

    #[test]
    fn mask_set_operations() {
        let a = CoreMask::new(0b1100);
        let b = CoreMask::new(0b1010);

        assert_eq!((a | b).bits(), 0b1110);
        assert_eq!((a & b).bits(), 0b1000);
        assert_eq!((a - b).bits(), 0b0100);
        assert!(a.is_subset_of(CoreMask::new(0b1111)));
        assert!(!CoreMask::new(0b1_0000).is_subset_of(CoreMask::new(0b1111)));
    }

    #[test]
    fn mask_clamp_to_present() {
        let present = CoreMask::first(4);
        let wanted = CoreMask::new(0xff);
        assert_eq!(wanted.clamp_to(present), present);
    }

    #[test]
    fn job_slot_folds_out_of_range() {
        assert_eq!(JobSlot::new(0).index(), 0);
        assert_eq!(JobSlot::new(200).index(), JobSlot::COUNT - 1);
    }
}
