//! Counter-based synchronization for task completion tracking.
//!
//! Counters track the number of outstanding tasks and let callers wait for
//! all of them to settle. A task settles in one of two ways: it is resumed
//! to completion, or it is interrupted at shutdown. Both decrement the
//! counter; interruptions are additionally recorded so callers can tell the
//! two apart.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A thread-safe counter observing task completion and cancellation.
///
/// Counters start at a specified value and decrement as tasks settle.
/// Callers can wait on a counter to reach zero, indicating all tracked
/// tasks have either run or been interrupted.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

struct CounterInner {
    remaining: AtomicUsize,
    cancelled: AtomicUsize,
}

impl Counter {
    /// Creates a new counter with the specified initial value.
    pub fn new(initial: usize) -> Self {
        Counter {
            inner: Arc::new(CounterInner {
                remaining: AtomicUsize::new(initial),
                cancelled: AtomicUsize::new(0),
            }),
        }
    }

    /// Adds `n` more expected completions.
    pub fn add(&self, n: usize) {
        self.inner.remaining.fetch_add(n, Ordering::SeqCst);
    }

    /// Records one successful completion.
    pub fn complete_one(&self) {
        self.inner.remaining.fetch_sub(1, Ordering::SeqCst);
    }

    /// Records one cancellation. Called when a tracked task is interrupted
    /// instead of resumed.
    pub fn cancel_one(&self) {
        self.inner.cancelled.fetch_add(1, Ordering::SeqCst);
        self.inner.remaining.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns the number of tasks that have not settled yet.
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::SeqCst)
    }

    /// Returns the number of tracked tasks that were interrupted.
    pub fn cancelled(&self) -> usize {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Checks if every tracked task has settled.
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Waits for the counter to reach zero.
    ///
    /// Uses exponential backoff polling; the caller must not hold resources
    /// the tracked tasks need to make progress.
    pub fn wait(&self) {
        let mut backoff_us = 1;
        const MAX_BACKOFF_US: u64 = 1000;

        while !self.is_complete() {
            thread::sleep(Duration::from_micros(backoff_us));
            backoff_us = (backoff_us * 2).min(MAX_BACKOFF_US);
        }
    }

    /// Waits for the counter to reach zero, giving up after `timeout`.
    ///
    /// Returns `true` if the counter settled within the window.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff_us = 1;
        const MAX_BACKOFF_US: u64 = 1000;

        while !self.is_complete() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_micros(backoff_us));
            backoff_us = (backoff_us * 2).min(MAX_BACKOFF_US);
        }
        true
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new(5);
        assert_eq!(counter.remaining(), 5);
        assert!(!counter.is_complete());

        counter.complete_one();
        assert_eq!(counter.remaining(), 4);

        counter.add(1);
        assert_eq!(counter.remaining(), 5);
    }

    #[test]
    fn test_counter_completion() {
        let counter = Counter::new(1);
        assert!(!counter.is_complete());

        counter.complete_one();
        assert!(counter.is_complete());
    }

    #[test]
    fn test_counter_cancellation_settles() {
        let counter = Counter::new(2);
        counter.complete_one();
        counter.cancel_one();

        assert!(counter.is_complete());
        assert_eq!(counter.cancelled(), 1);
    }

    #[test]
    fn test_counter_wait_timeout_expires() {
        let counter = Counter::new(1);
        assert!(!counter.wait_timeout(Duration::from_millis(20)));

        counter.complete_one();
        assert!(counter.wait_timeout(Duration::from_millis(20)));
    }
}
