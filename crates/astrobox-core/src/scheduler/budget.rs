//! Global resource-unit ledger shared by all running jobs.
//!
//! Admission reserves a job's units against the budget sampled at that
//! moment; the returned [`Reservation`] gives them back when dropped, so the
//! ledger total always equals the units held by live reservations.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct UnitLedger {
    in_use: AtomicU32,
}

impl UnitLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Units currently held by running jobs.
    pub fn in_use(&self) -> u32 {
        self.in_use.load(Ordering::Acquire)
    }

    /// Reserve exactly `units` if `in_use + units <= budget`; otherwise nothing.
    pub fn try_reserve(self: &Arc<Self>, units: u32, budget: u32) -> Option<Reservation> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(units)?;
            if next > budget {
                return None;
            }
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Reservation {
                        ledger: Arc::clone(self),
                        units,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, units: u32) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(units))
            });
    }
}

/// Units held for one running job; released exactly once, on drop.
#[derive(Debug)]
pub struct Reservation {
    ledger: Arc<UnitLedger>,
    units: u32,
}

impl Reservation {
    pub fn units(&self) -> u32 {
        self.units
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.ledger.release(self.units);
    }
}
