//! Lightweight lifecycle counters for the pool.
//!
//! All counters use relaxed atomics; values are monotonic and may lag the
//! events they count by a few instructions.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Metrics {
    pub(crate) tasks_enqueued: AtomicU64,
    pub(crate) tasks_executed: AtomicU64,
    pub(crate) tasks_donated: AtomicU64,
    pub(crate) tasks_interrupted: AtomicU64,
    pub(crate) threads_spawned: AtomicU64,
    pub(crate) threads_retired: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_donated: self.tasks_donated.load(Ordering::Relaxed),
            tasks_interrupted: self.tasks_interrupted.load(Ordering::Relaxed),
            threads_spawned: self.threads_spawned.load(Ordering::Relaxed),
            threads_retired: self.threads_retired.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool counters at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    /// Tasks admitted through `enqueue` (all routing tiers).
    pub tasks_enqueued: u64,
    /// Tasks resumed by a worker.
    pub tasks_executed: u64,
    /// Tasks moved from a busy worker to idle peers.
    pub tasks_donated: u64,
    /// Tasks cancelled by the shutdown drain.
    pub tasks_interrupted: u64,
    /// OS threads spawned over the pool's lifetime.
    pub threads_spawned: u64,
    /// OS threads that exited their work loop (idle timeout or shutdown).
    pub threads_retired: u64,
}
