//! # BASALT Error Handling
//!
//! Error types for the power-state coordination engine.
//!
//! Error handling follows these principles:
//! - Errors are typed and categorized
//! - No panics in production code paths
//! - Fatal hardware conditions are distinguished from retryable ones
//! - Errors are `no_std` compatible

use core::fmt;

use crate::types::CoreType;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// BASALT Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Unified error type for the power engine.
///
/// A timed-out hardware transition leaves the affected domain in an
/// ambiguous state, so timeouts are fatal: the device is marked degraded
/// and every later power request is rejected with [`Error::DeviceUnusable`].
/// Everything else is either retryable or deferred internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Fatal Hardware Errors
    // =========================================================================
    /// A bounded register poll exhausted its budget.
    PollTimeout {
        /// Domain whose readiness never arrived.
        domain: CoreType,
    },
    /// A firmware acknowledgment did not arrive within its deadline.
    AckTimeout {
        /// Domain waiting on the acknowledgment.
        domain: CoreType,
    },
    /// The device was previously marked degraded; request rejected.
    DeviceUnusable,

    // =========================================================================
    // Policy Errors
    // =========================================================================
    /// A policy switch is already in flight; retry later.
    PolicyChangeBusy,
    /// A policy switch is already queued behind an active reset.
    PolicyChangePending,
    /// The requested policy id is not registered on this device.
    UnknownPolicy,

    // =========================================================================
    // Configuration / Request Errors
    // =========================================================================
    /// The operation requires a scheduling microcontroller.
    NoMcu,
    /// A requested core mask contains cores that are not present.
    InvalidCoreMask,
}

impl Error {
    /// True for errors that permanently degrade the device.
    #[inline]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::PollTimeout { .. } | Self::AckTimeout { .. } | Self::DeviceUnusable
        )
    }

    /// True for errors the caller may simply retry.
    #[inline]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::PolicyChangeBusy)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PollTimeout { domain } => {
                write!(f, "{domain} power transition poll exceeded its budget")
            }
            Self::AckTimeout { domain } => {
                write!(f, "{domain} firmware acknowledgment deadline exceeded")
            }
            Self::DeviceUnusable => write!(f, "device is degraded; power requests rejected"),
            Self::PolicyChangeBusy => write!(f, "a policy change is already in progress"),
            Self::PolicyChangePending => {
                write!(f, "a policy change is already queued behind a reset")
            }
            Self::UnknownPolicy => write!(f, "unknown power policy"),
            Self::NoMcu => write!(f, "device has no scheduling microcontroller"),
            Self::InvalidCoreMask => write!(f, "core mask contains non-present cores"),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_classification() {
        assert!(Error::PollTimeout { domain: CoreType::L2 }.is_fatal());
        assert!(Error::AckTimeout { domain: CoreType::Mcu }.is_fatal());
        assert!(Error::DeviceUnusable.is_fatal());
        assert!(!Error::PolicyChangeBusy.is_fatal());
        assert!(Error::PolicyChangeBusy.is_retryable());
        assert!(!Error::UnknownPolicy.is_retryable());
    }

    #[test]
    fn display_names_domain() {
        extern crate alloc;
        use alloc::string::ToString;

        let msg = Error::PollTimeout { domain: CoreType::Shader }.to_string();
        assert!(msg.contains("shader"));
    }
}
