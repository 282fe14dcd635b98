//! Last-write-wins trigger coalescing

use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

/// Identifies one scheduled attempt. The sequence number is what gets
/// compared; two triggers in the same clock tick still differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerStamp {
    pub seq: u64,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct PendingState {
    next_seq: u64,
    current: Option<TriggerStamp>,
}

/// Pending trigger for one persona
#[derive(Debug, Default)]
pub struct Debouncer {
    state: Mutex<PendingState>,
}

impl Debouncer {
    /// Record a new trigger, superseding whatever was pending
    pub fn stamp(&self, now: Instant) -> TriggerStamp {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_seq += 1;
        let stamp = TriggerStamp {
            seq: state.next_seq,
            at: now,
        };
        state.current = Some(stamp);
        stamp
    }

    /// Called when a delayed attempt fires. Returns true (and clears the
    /// pending slot) only if `stamp` is still the latest trigger.
    pub fn claim(&self, stamp: TriggerStamp) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.current == Some(stamp) {
            state.current = None;
            true
        } else {
            false
        }
    }
}
