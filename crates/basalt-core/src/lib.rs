//! # BASALT Core
//!
//! Foundational types, error handling and collaborator traits for the
//! BASALT GPU power-state coordination engine.
//!
//! This crate has no hardware dependencies: everything that touches a
//! register, a firmware mailbox or a hardware counter block is reached
//! through the [`PmHardware`] capability trait, injected at device
//! construction. That keeps the engine itself (`basalt-pm`) fully
//! host-testable.
//!
//! ## Design Principles
//!
//! 1. **Strong typing**: core masks, policy ids and request domains are
//!    distinct types, not bare integers
//! 2. **No panics**: fallible paths return [`Error`], never unwrap
//! 3. **`no_std` first**: usable from the kernel-side driver as-is

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod hw;
pub mod types;

// Re-exports for convenience
pub use error::{Error, Result};
pub use hw::{HwCaps, PmHardware};
pub use types::{CoreMask, CoreType, JobSlot, PmSchedFlags, PolicyId};
