//! Task definitions and execution logic.
//!
//! Tasks are opaque units of work consumed by the pool. Each task carries a
//! payload plus one intrusive link so queues can chain tasks without
//! per-node allocations beyond the task itself.

use std::ptr;

use crate::counter::Counter;
use crate::error::PoolShutdown;

/// Payload contract for tasks needing full control over both outcomes.
///
/// `resume` runs the work; returning `Err(PoolShutdown)` tells the worker
/// the pool is gone and makes it retire quietly. `interrupt` delivers a
/// cancellation instead of running the work; it is called only by the
/// shutdown drain and must not panic.
pub trait Runnable: Send + 'static {
    /// Executes the work.
    fn resume(self: Box<Self>) -> Result<(), PoolShutdown>;

    /// Abandons the work, notifying any observer. Defaults to dropping the
    /// payload.
    fn interrupt(self: Box<Self>) {}
}

/// Internal representation of a task payload.
enum Payload {
    /// Plain closure; dropped silently on interrupt.
    Run(Box<dyn FnOnce() + Send + 'static>),
    /// Closure whose completion or cancellation is observed by a counter.
    Counted {
        run: Box<dyn FnOnce() + Send + 'static>,
        counter: Counter,
    },
    /// User-defined resume/interrupt behavior.
    Custom(Box<dyn Runnable>),
}

/// A unit of work to be executed by the pool.
///
/// Queues link tasks through the embedded `next` pointer; a task belongs to
/// at most one queue at a time and the link is cleared whenever the task is
/// popped.
pub struct Task {
    payload: Payload,
    pub(crate) next: *mut Task,
}

// SAFETY: `next` is queue-internal linkage, only ever touched by the list
// that owns the node; every payload variant is Send.
unsafe impl Send for Task {}

impl Task {
    /// Creates a task from a plain closure.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            payload: Payload::Run(Box::new(work)),
            next: ptr::null_mut(),
        }
    }

    /// Creates a task whose outcome is reported to `counter`: completion on
    /// resume, cancellation on interrupt.
    pub fn with_counter<F>(work: F, counter: Counter) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            payload: Payload::Counted {
                run: Box::new(work),
                counter,
            },
            next: ptr::null_mut(),
        }
    }

    /// Creates a task from a custom [`Runnable`] payload.
    pub fn from_runnable(runnable: Box<dyn Runnable>) -> Self {
        Task {
            payload: Payload::Custom(runnable),
            next: ptr::null_mut(),
        }
    }

    /// Runs the task. Consumes the node; the task must already be unlinked.
    pub(crate) fn resume(self: Box<Self>) -> Result<(), PoolShutdown> {
        debug_assert!(self.next.is_null());
        let Task { payload, .. } = *self;
        match payload {
            Payload::Run(work) => {
                work();
                Ok(())
            }
            Payload::Counted { run, counter } => {
                run();
                counter.complete_one();
                Ok(())
            }
            Payload::Custom(runnable) => runnable.resume(),
        }
    }

    /// Cancels the task without running it.
    pub(crate) fn interrupt(self: Box<Self>) {
        debug_assert!(self.next.is_null());
        let Task { payload, .. } = *self;
        match payload {
            Payload::Run(work) => drop(work),
            Payload::Counted { run, counter } => {
                drop(run);
                counter.cancel_one();
            }
            Payload::Custom(runnable) => runnable.interrupt(),
        }
    }
}
