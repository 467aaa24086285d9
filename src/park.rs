//! Worker parking.
//!
//! A binary semaphore built from a mutex-protected permit and a condvar.
//! `release` grants at most one permit; `acquire_until` consumes it or
//! times out at the deadline. Spurious condvar wake-ups are absorbed here,
//! so callers only see "permit" or "deadline".

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

pub(crate) struct Semaphore {
    permit: Mutex<bool>,
    signaled: Condvar,
}

impl Semaphore {
    pub(crate) fn new() -> Self {
        Self {
            permit: Mutex::new(false),
            signaled: Condvar::new(),
        }
    }

    /// Grants the permit. Releasing an already-signaled semaphore is a
    /// no-op, keeping it binary.
    pub(crate) fn release(&self) {
        let mut permit = self.permit.lock();
        if !*permit {
            *permit = true;
            self.signaled.notify_one();
        }
    }

    /// Blocks until the permit is granted or `deadline` passes.
    ///
    /// Returns `true` iff the permit was consumed.
    pub(crate) fn acquire_until(&self, deadline: Instant) -> bool {
        let mut permit = self.permit.lock();
        loop {
            if *permit {
                *permit = false;
                return true;
            }
            if self.signaled.wait_until(&mut permit, deadline).timed_out() {
                // one last look; the permit may have landed with the timeout
                if *permit {
                    *permit = false;
                    return true;
                }
                return false;
            }
        }
    }
}
