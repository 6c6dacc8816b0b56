//! # DVFS Metrics Sampler
//!
//! Accumulates busy/idle/protected-mode time for the frequency
//! governor. The job scheduler reports per-slot activity through
//! [`Metrics::record_active`]; a periodic governor timer pulls a window
//! with [`Metrics::sample_and_reset`].
//!
//! Counters are cumulative; a sample diffs against the previous
//! snapshot. A negative delta can only come from a logic error, so it
//! is clamped to zero and counted for diagnostics instead of being
//! propagated.

use basalt_core::JobSlot;
use log::error;
use spin::Mutex;

// =============================================================================
// WINDOW
// =============================================================================

/// One sampled DVFS window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsWindow {
    /// Wall-clock length of the window in nanoseconds.
    pub window_ns: u64,
    /// Time the GPU was executing jobs. Protected-mode time is included
    /// here as well, since the GPU is assumed fully busy in that mode.
    pub busy_ns: u64,
    /// Time the GPU was idle.
    pub idle_ns: u64,
    /// Time spent in protected mode.
    pub in_protected_ns: u64,
}

// =============================================================================
// ACCUMULATOR
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    busy_ns: u64,
    idle_ns: u64,
    protm_ns: u64,
}

#[derive(Debug)]
struct Inner {
    /// Timestamp up to which the counters are settled.
    period_start_ns: u64,
    /// Start of the current sample window.
    window_start_ns: u64,
    /// Jobs currently active, per slot.
    active_slots: [u32; JobSlot::COUNT],
    gpu_active: bool,
    in_protected: bool,
    /// Cumulative counters since attach.
    values: Counts,
    /// Snapshot of `values` at the previous sample.
    last: Counts,
    /// Number of negative deltas clamped to zero.
    clamp_events: u32,
}

impl Inner {
    /// Settle busy/idle time from `period_start_ns` up to `now_ns`.
    fn advance(&mut self, now_ns: u64) {
        let elapsed = now_ns.saturating_sub(self.period_start_ns);
        if elapsed == 0 {
            return;
        }
        if self.in_protected {
            self.values.protm_ns += elapsed;
            self.values.busy_ns += elapsed;
        } else if self.gpu_active {
            self.values.busy_ns += elapsed;
        } else {
            self.values.idle_ns += elapsed;
        }
        self.period_start_ns = now_ns;
    }
}

// =============================================================================
// SAMPLER
// =============================================================================

/// Busy/idle/protected time sampler shared between the scheduler
/// callback path and the governor timer.
#[derive(Debug)]
pub struct Metrics {
    inner: Mutex<Inner>,
}

impl Metrics {
    /// New sampler; `now_ns` anchors the first window.
    pub fn new(now_ns: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                period_start_ns: now_ns,
                window_start_ns: now_ns,
                active_slots: [0; JobSlot::COUNT],
                gpu_active: false,
                in_protected: false,
                values: Counts::default(),
                last: Counts::default(),
                clamp_events: 0,
            }),
        }
    }

    /// Record a job becoming active (`true`) or retiring (`false`) on a
    /// slot. Safe to call from contexts that cannot block: the only
    /// wait is a short spin on the metrics lock.
    pub fn record_active(&self, slot: JobSlot, active: bool, now_ns: u64) {
        let mut m = self.inner.lock();
        m.advance(now_ns);
        let count = &mut m.active_slots[slot.index()];
        if active {
            *count = count.saturating_add(1);
        } else {
            *count = count.saturating_sub(1);
        }
        m.gpu_active = m.active_slots.iter().any(|&c| c > 0);
    }

    /// Track entry to / exit from protected mode.
    pub fn set_protected(&self, in_protected: bool, now_ns: u64) {
        let mut m = self.inner.lock();
        m.advance(now_ns);
        m.in_protected = in_protected;
    }

    /// Close the current window and return its deltas.
    pub fn sample_and_reset(&self, now_ns: u64) -> MetricsWindow {
        let mut m = self.inner.lock();
        m.advance(now_ns);

        let mut clamped = false;
        let mut delta = |now: u64, then: u64| match now.checked_sub(then) {
            Some(d) => d,
            None => {
                clamped = true;
                0
            }
        };

        let window = MetricsWindow {
            window_ns: now_ns.saturating_sub(m.window_start_ns),
            busy_ns: delta(m.values.busy_ns, m.last.busy_ns),
            idle_ns: delta(m.values.idle_ns, m.last.idle_ns),
            in_protected_ns: delta(m.values.protm_ns, m.last.protm_ns),
        };

        if clamped {
            m.clamp_events += 1;
            error!("metrics: negative sample delta clamped to zero");
        }

        m.last = m.values;
        m.window_start_ns = now_ns;
        window
    }

    /// True while any slot reports active jobs.
    pub fn gpu_active(&self) -> bool {
        self.inner.lock().gpu_active
    }

    /// Diagnostics: number of clamped (logically impossible) deltas.
    pub fn clamp_events(&self) -> u32 {
        self.inner.lock().clamp_events
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn idle_window_has_zero_busy() {
        let m = Metrics::new(0);
        let w = m.sample_and_reset(10 * MS);
        assert_eq!(w.busy_ns, 0);
        assert_eq!(w.idle_ns, 10 * MS);

        // A second sample with no intervening activity is all idle too.
        let w = m.sample_and_reset(20 * MS);
        assert_eq!(w.busy_ns, 0);
        assert_eq!(w.idle_ns, 10 * MS);
    }

    #[test]
    fn busy_plus_idle_covers_window() {
        let m = Metrics::new(0);
        m.record_active(JobSlot::new(0), true, 2 * MS);
        m.record_active(JobSlot::new(0), false, 7 * MS);
        let w = m.sample_and_reset(10 * MS);

        assert_eq!(w.busy_ns, 5 * MS);
        assert_eq!(w.idle_ns, 5 * MS);
        assert_eq!(w.busy_ns + w.idle_ns, w.window_ns);
    }

    #[test]
    fn overlapping_slots_stay_busy_until_last_retires() {
        let m = Metrics::new(0);
        m.record_active(JobSlot::new(0), true, 0);
        m.record_active(JobSlot::new(1), true, MS);
        m.record_active(JobSlot::new(0), false, 2 * MS);
        assert!(m.gpu_active());
        m.record_active(JobSlot::new(1), false, 4 * MS);
        assert!(!m.gpu_active());

        let w = m.sample_and_reset(5 * MS);
        assert_eq!(w.busy_ns, 4 * MS);
        assert_eq!(w.idle_ns, MS);
    }

    #[test]
    fn protected_time_counts_as_busy() {
        let m = Metrics::new(0);
        m.set_protected(true, MS);
        m.set_protected(false, 3 * MS);
        let w = m.sample_and_reset(4 * MS);

        assert_eq!(w.in_protected_ns, 2 * MS);
        assert_eq!(w.busy_ns, 2 * MS);
        assert_eq!(w.idle_ns, 2 * MS);
    }

    #[test]
    fn negative_delta_is_clamped_and_counted() {
        let m = Metrics::new(0);
        // Forge a snapshot ahead of the cumulative counters, as a logic
        // error elsewhere would produce.
        m.inner.lock().last.busy_ns = 5 * MS;

        let w = m.sample_and_reset(2 * MS);
        assert_eq!(w.busy_ns, 0);
        assert_eq!(w.idle_ns, 2 * MS);
        assert_eq!(m.clamp_events(), 1);

        // The snapshot resynchronizes; later windows are healthy and
        // the diagnostic counter does not grow.
        let w = m.sample_and_reset(3 * MS);
        assert_eq!(w.busy_ns, 0);
        assert_eq!(w.idle_ns, MS);
        assert_eq!(m.clamp_events(), 1);
    }

    #[test]
    fn unbalanced_retire_does_not_underflow() {
        let m = Metrics::new(0);
        m.record_active(JobSlot::new(2), false, MS);
        assert!(!m.gpu_active());
        assert_eq!(m.clamp_events(), 0);
    }
}
