//! Arm/disarm switch for the liveness sweep timer.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared on/off state of the recurring sweep.
///
/// Both operations are idempotent and report whether they changed anything, so
/// concurrent dispatches and sweeps can toggle freely.
pub trait SweepSchedule: Send + Sync {
    /// Enable the schedule. Returns `true` if it was previously disarmed.
    fn arm(&self) -> bool;

    /// Disable the schedule. Returns `true` if it was previously armed.
    fn disarm(&self) -> bool;

    fn is_armed(&self) -> bool;
}

/// Compare-and-swap on a single boolean.
#[derive(Debug, Default)]
pub struct AtomicSweepSchedule {
    armed: AtomicBool,
}

impl AtomicSweepSchedule {
    pub fn new(armed: bool) -> Self {
        Self {
            armed: AtomicBool::new(armed),
        }
    }
}

impl SweepSchedule for AtomicSweepSchedule {
    fn arm(&self) -> bool {
        self.armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn disarm(&self) -> bool {
        self.armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}
