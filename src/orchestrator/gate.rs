//! Per-persona processing gate

use std::sync::atomic::{AtomicBool, Ordering};

/// Busy flag guarding completion attempts for one persona
#[derive(Debug, Default)]
pub struct Gate {
    busy: AtomicBool,
}

impl Gate {
    /// Test-and-set the busy flag. `None` means an attempt is already running.
    pub fn try_acquire(&self) -> Option<GateGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Holds the gate closed; dropping it (return, `?`, or unwind) reopens it
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
