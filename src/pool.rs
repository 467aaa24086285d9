//! The thread pool: construction, task routing, and shutdown.
//!
//! `ThreadPool` owns a fixed set of workers and routes each submitted task
//! with a three-tier policy: hand it to the submitting worker itself when
//! that worker is about to go idle, otherwise claim and wake an idle peer,
//! otherwise keep it on the submitting worker, and as a last resort (for
//! non-worker callers with no idle peer) round-robin across the pool.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use tracing::debug;

use crate::counter::Counter;
use crate::error::PoolShutdown;
use crate::idle::IdleWorkerSet;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::task::Task;
use crate::worker::{current_worker_index, scan_start_hint, Worker};

/// Pool construction parameters.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Used to derive worker thread names (`"<name>_worker_<index>"`).
    pub name: String,
    /// Number of workers; fixed for the pool's lifetime.
    pub pool_size: usize,
    /// How long a worker stays parked before retiring its OS thread.
    pub max_idle_time: Duration,
}

impl PoolConfig {
    /// Validates the configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.pool_size > 0, "pool_size must be > 0");
        assert!(!self.name.is_empty(), "pool name must not be empty");
        assert!(
            self.max_idle_time > Duration::ZERO,
            "max_idle_time must be > 0"
        );
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "threadmill".to_string(),
            pool_size: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_idle_time: Duration::from_secs(30),
        }
    }
}

pub(crate) struct PoolInner {
    pub(crate) name: String,
    pub(crate) max_idle_time: Duration,
    pub(crate) workers: Box<[CachePadded<Worker>]>,
    pub(crate) idle_workers: IdleWorkerSet,
    pub(crate) round_robin_cursor: AtomicUsize,
    pub(crate) abort: AtomicBool,
    pub(crate) metrics: Metrics,
}

/// A fixed-size pool of worker threads executing opaque tasks.
///
/// Threads are spawned lazily on demand and retired after
/// [`max_worker_idle_time`](ThreadPool::max_worker_idle_time) without work.
/// Dropping the pool shuts it down: queued tasks are interrupted and all
/// worker threads are joined.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Creates a new pool. All workers start idle; no threads are spawned
    /// until the first task arrives.
    pub fn new(config: PoolConfig) -> Self {
        config.validate();
        let PoolConfig {
            name,
            pool_size,
            max_idle_time,
        } = config;

        let workers = (0..pool_size)
            .map(|index| {
                CachePadded::new(Worker::new(
                    index,
                    pool_size,
                    max_idle_time,
                    format!("{name}_worker_{index}"),
                ))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let idle_workers = IdleWorkerSet::new(pool_size);
        for index in 0..pool_size {
            idle_workers.set_idle(index);
        }

        debug!(pool = %name, pool_size, "thread pool created");

        Self {
            inner: Arc::new(PoolInner {
                name,
                max_idle_time,
                workers,
                idle_workers,
                round_robin_cursor: AtomicUsize::new(0),
                abort: AtomicBool::new(false),
                metrics: Metrics::new(),
            }),
        }
    }

    /// Admits a task into the pool.
    ///
    /// Fails with [`PoolShutdown`] once [`shutdown`](Self::shutdown) has
    /// been requested; the task is dropped in that case.
    pub fn enqueue(&self, task: Task) -> Result<(), PoolShutdown> {
        self.route(Box::new(task))?;
        self.inner
            .metrics
            .tasks_enqueued
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn route(&self, task: Box<Task>) -> Result<(), PoolShutdown> {
        let inner = &self.inner;
        let this_index = current_worker_index(inner);

        // a quiescent worker takes its own submission without any atomics
        if let Some(index) = this_index {
            let worker = &inner.workers[index];
            if worker.appears_empty() {
                return worker.enqueue_local(inner, task);
            }
        }

        // claim-and-wake an idle peer
        let start = match this_index {
            Some(index) => index,
            None => scan_start_hint(inner.workers.len()),
        };
        if let Some(found) = inner.idle_workers.find_idle_worker(this_index, start) {
            return inner.workers[found].enqueue_foreign(inner, task);
        }

        // a busy worker keeps the task local; donation spreads it later
        if let Some(index) = this_index {
            return inner.workers[index].enqueue_local(inner, task);
        }

        // non-worker caller, nobody idle
        let next = inner.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % inner.workers.len();
        inner.workers[next].enqueue_foreign(inner, task)
    }

    /// Convenience wrapper turning a closure into a task.
    pub fn submit<F>(&self, work: F) -> Result<(), PoolShutdown>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Task::new(work))
    }

    /// Submits a closure and returns a counter that settles when it has run
    /// or been interrupted.
    pub fn run<F>(&self, work: F) -> Result<Counter, PoolShutdown>
    where
        F: FnOnce() + Send + 'static,
    {
        let counter = Counter::new(1);
        self.enqueue(Task::with_counter(work, counter.clone()))?;
        Ok(counter)
    }

    /// Shuts the pool down: rejects further submissions, joins all worker
    /// threads, and interrupts every task still queued. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.abort.swap(true, Ordering::Relaxed) {
            return; // shutdown had been requested before
        }

        debug!(pool = %self.inner.name, "shutting down thread pool");
        for worker in self.inner.workers.iter() {
            worker.shutdown(&self.inner);
        }
    }

    /// Number of workers, i.e. the maximum parallelism the pool provides.
    pub fn max_concurrency_level(&self) -> usize {
        self.inner.workers.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested.
    pub fn shutdown_requested(&self) -> bool {
        self.inner.abort.load(Ordering::Relaxed)
    }

    /// Idle window after which a parked worker retires its OS thread.
    pub fn max_worker_idle_time(&self) -> Duration {
        self.inner.max_idle_time
    }

    /// The pool's configured name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Snapshot of the pool's lifecycle counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Approximate number of idle workers. Racy by design; useful for
    /// observing quiescence, not for control flow.
    pub fn approx_idle_workers(&self) -> usize {
        self.inner.idle_workers.approx_len()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.inner.name)
            .field("pool_size", &self.inner.workers.len())
            .field("shutdown_requested", &self.shutdown_requested())
            .finish()
    }
}
