//! Shader power-off hysteresis timer.
//!
//! The timer itself lives outside the engine (a periodic collaborator
//! drives [`TickTimer::tick`]); this module only keeps the countdown
//! state. Cancellation is never forcibly dequeued: a cancel marks the
//! next queued tick as a no-op instead, which avoids a double-cancel
//! race with an already-fired tick.

// =============================================================================
// TICK TIMER
// =============================================================================

/// Countdown state for the delayed shader power-down.
#[derive(Debug, Clone, Copy)]
pub struct TickTimer {
    configured_ticks: u32,
    remaining_ticks: u32,
    armed: bool,
    /// A cancellation was requested while a tick may still be queued;
    /// that tick must run as a no-op.
    cancel_queued: bool,
}

/// Outcome of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    /// Nothing to do (disarmed, or a cancelled tick ran as a no-op).
    None,
    /// Still counting down.
    CountedDown,
    /// The countdown reached zero; shaders may power down now.
    Expired,
}

impl TickTimer {
    /// New disarmed timer with the configured tick count.
    pub const fn new(configured_ticks: u32) -> Self {
        Self {
            configured_ticks,
            remaining_ticks: 0,
            armed: false,
            cancel_queued: false,
        }
    }

    /// Arm the countdown. Re-arming restarts it.
    pub fn arm(&mut self) {
        self.remaining_ticks = self.configured_ticks;
        self.armed = true;
    }

    /// Cancel a running countdown. Any tick already queued by the timer
    /// collaborator will run as a no-op.
    pub fn cancel(&mut self) {
        if self.armed {
            self.cancel_queued = true;
        }
        self.armed = false;
    }

    /// Process one tick from the timer collaborator.
    pub fn tick(&mut self) -> TickEvent {
        if self.cancel_queued {
            self.cancel_queued = false;
            return TickEvent::None;
        }
        if !self.armed {
            return TickEvent::None;
        }
        if self.remaining_ticks > 0 {
            self.remaining_ticks -= 1;
        }
        if self.remaining_ticks == 0 {
            self.armed = false;
            TickEvent::Expired
        } else {
            TickEvent::CountedDown
        }
    }

    /// True once an armed countdown has run out (or was configured to
    /// zero ticks, which expires immediately).
    #[inline]
    pub fn expired(&self) -> bool {
        !self.armed && !self.cancel_queued && self.remaining_ticks == 0
    }

    /// True while the countdown is running.
    #[inline]
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// True while a cancelled tick is still queued.
    #[inline]
    pub fn cancel_queued(&self) -> bool {
        self.cancel_queued
    }

    /// Remaining ticks of a running countdown.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining_ticks
    }

    /// Return to the initial disarmed state (device reset). The timer
    /// collaborator restarts with the device, so a queued cancellation
    /// is dropped rather than left for a tick that will never come.
    pub fn reset(&mut self) {
        self.armed = false;
        self.cancel_queued = false;
        self.remaining_ticks = 0;
    }
}

// =============================================================================
// TESTS
// =============================================================================
