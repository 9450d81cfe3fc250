//! Cycle-fault accounting.
//!
//! Faults that are local to one sampling cycle (a dropped frame, a missed
//! completion) are counted here instead of disappearing silently. The
//! heartbeat task reports the totals periodically.

use core::sync::atomic::{AtomicU32, Ordering};

/// Recoverable per-cycle fault classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Fault {
    /// No hardware completion arrived within the bounded wait.
    CompletionTimeout,
    /// The completion channel was still full when the interrupt signaled.
    LostWakeup,
    /// The relay had not consumed the previous cycle's handoff.
    HandoffDrop,
    /// All CAN transmit mailboxes were pending; the frame was dropped.
    TransmitDrop,
    /// The acquisition transfer errored or could not be started.
    Acquisition,
}

const NUM_FAULTS: usize = 5;

pub struct Counters {
    counts: [AtomicU32; NUM_FAULTS],
}

/// The running totals for this boot.
pub static CYCLE_FAULTS: Counters = Counters::new();

impl Counters {
    pub const fn new() -> Self {
        const ZERO: AtomicU32 = AtomicU32::new(0);
        Self {
            counts: [ZERO; NUM_FAULTS],
        }
    }

    /// Records one occurrence and returns the new total for that class.
    pub fn record(&self, fault: Fault) -> u32 {
        self.counts[fault as usize].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn count(&self, fault: Fault) -> u32 {
        self.counts[fault as usize].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u32 {
        self.counts
            .iter()
            .fold(0u32, |sum, count| sum.wrapping_add(count.load(Ordering::Relaxed)))
    }
}
