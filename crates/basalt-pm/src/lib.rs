//! # BASALT Power Engine
//!
//! The power-state coordination engine for the BASALT GPU driver: three
//! cooperating finite-state machines (L2 cache, scheduling MCU, shader
//! cores), a pluggable policy engine deciding *when* power is wanted,
//! a hysteresis timer delaying shader power-down, and a DVFS metrics
//! sampler measuring how busy the device actually was.
//!
//! All hardware access goes through the [`basalt_core::PmHardware`]
//! capability trait; the engine itself is `no_std` and host-testable.
//!
//! ## Structure
//!
//! - [`device`]: the per-device coordinator and lock hierarchy
//! - [`l2`], [`mcu`], [`shaders`]: the three state machines
//! - [`policy`]: the policy trait and the built-in policies
//! - [`tick`], [`metrics`]: hysteresis timer and DVFS sampling
//! - [`config`]: probe-time configuration

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod config;
pub mod device;
pub mod l2;
pub mod mcu;
pub mod metrics;
pub mod policy;
pub mod shaders;
pub mod tick;

mod poll;

// Re-exports for convenience
pub use basalt_core::{
    CoreMask, CoreType, Error, HwCaps, JobSlot, PmHardware, PmSchedFlags, PolicyId, Result,
};
pub use config::PmConfig;
pub use device::PmDevice;
pub use l2::L2State;
pub use mcu::McuState;
pub use metrics::MetricsWindow;
pub use policy::{Demand, PolicyData, PowerPolicy};
pub use shaders::ShaderState;
