//! Worker thread implementation.
//!
//! Each worker owns two task queues: a lock-protected public inbox that any
//! thread may push into, and a private queue touched only by the thread
//! currently running the worker's loop. The loop drains the private queue,
//! donating surplus tasks to idle peers along the way; when both queues are
//! empty the worker parks on its semaphore and, after `max_idle_time`,
//! retires its OS thread. The next foreign enqueue spawns a fresh one.

use std::cell::{Cell, UnsafeCell};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::error::PoolShutdown;
use crate::list::TaskList;
use crate::park::Semaphore;
use crate::pool::PoolInner;
use crate::task::Task;

/// Per-thread worker context, set by the worker's thread entry.
///
/// The pool pointer identifies which pool this thread belongs to, so
/// reentrant submissions to a *different* pool take the foreign path.
struct PerThreadData {
    pool: Cell<*const PoolInner>,
    worker_index: Cell<usize>,
    hashed_id: usize,
}

thread_local! {
    static THREAD_POOL_DATA: PerThreadData = PerThreadData {
        pool: Cell::new(ptr::null()),
        worker_index: Cell::new(usize::MAX),
        hashed_id: hashed_thread_id(),
    };
}

fn hashed_thread_id() -> usize {
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish() as usize
}

/// Returns the calling thread's worker index, if it is currently running a
/// worker loop of `pool`.
pub(crate) fn current_worker_index(pool: &PoolInner) -> Option<usize> {
    THREAD_POOL_DATA.with(|tls| {
        if ptr::eq(tls.pool.get(), pool) {
            Some(tls.worker_index.get())
        } else {
            None
        }
    })
}

/// Scan starting position for callers that are not workers of the pool.
pub(crate) fn scan_start_hint(pool_size: usize) -> usize {
    THREAD_POOL_DATA.with(|tls| tls.hashed_id % pool_size)
}

struct Inbox {
    queue: TaskList,
    /// True iff no OS thread is currently executing this worker's loop.
    idle: bool,
    abort: bool,
    /// Handle of the current (or last retired, not yet joined) thread.
    thread: Option<JoinHandle<()>>,
}

pub(crate) struct Worker {
    index: usize,
    pool_size: usize,
    max_idle_time: Duration,
    thread_name: String,
    /// Lock-free mirror of `Inbox::abort` for the worker's own hot path.
    atomic_abort: AtomicBool,
    /// Wake-up handshake bit: set by producers before releasing the
    /// semaphore, cleared by the worker when it accepts a wake-up.
    task_found_or_abort: AtomicBool,
    semaphore: Semaphore,
    /// Touched only by the thread running the worker loop, or by
    /// `shutdown` after that thread has been joined.
    private_queue: UnsafeCell<TaskList>,
    /// Padded so producer traffic on the lock does not bounce the cache
    /// line holding the owner thread's hot fields.
    inbox: CachePadded<Mutex<Inbox>>,
}

// SAFETY: all shared fields are atomics or lock-protected. `private_queue`
// is the exception; it follows a single-owner discipline (the thread
// currently running `work_loop`, or `shutdown` once that thread is joined),
// which every access site documents.
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    pub(crate) fn new(
        index: usize,
        pool_size: usize,
        max_idle_time: Duration,
        thread_name: String,
    ) -> Self {
        Self {
            index,
            pool_size,
            max_idle_time,
            thread_name,
            atomic_abort: AtomicBool::new(false),
            task_found_or_abort: AtomicBool::new(false),
            semaphore: Semaphore::new(),
            private_queue: UnsafeCell::new(TaskList::new()),
            inbox: CachePadded::new(Mutex::new(Inbox {
                queue: TaskList::new(),
                idle: true,
                abort: false,
                thread: None,
            })),
        }
    }

    /// Best-effort hint that this worker is about to go looking for work.
    ///
    /// Only meaningful on the worker's own thread; used to pick the
    /// self-local submission fast path. A wrong answer in either direction
    /// is harmless.
    pub(crate) fn appears_empty(&self) -> bool {
        // SAFETY: callers guarantee this is the thread running this
        // worker's loop.
        let private_empty = unsafe { (*self.private_queue.get()).is_empty() };
        private_empty && !self.task_found_or_abort.load(Ordering::Relaxed)
    }

    /// Pushes a task into the public inbox from any thread, waking or
    /// spawning the worker as needed.
    pub(crate) fn enqueue_foreign(
        &self,
        pool: &Arc<PoolInner>,
        task: Box<Task>,
    ) -> Result<(), PoolShutdown> {
        let mut inbox = self.inbox.lock();
        if inbox.abort {
            return Err(PoolShutdown::new(&pool.name));
        }

        self.task_found_or_abort.store(true, Ordering::Relaxed);

        let first_enqueuer = inbox.queue.is_empty();
        inbox.queue.push_back(task);
        self.ensure_worker_active(pool, first_enqueuer, inbox);
        Ok(())
    }

    /// Splice variant of [`enqueue_foreign`](Self::enqueue_foreign) used by
    /// donation. Returns the batch untouched if this worker is aborted.
    pub(crate) fn enqueue_foreign_batch(
        &self,
        pool: &Arc<PoolInner>,
        batch: TaskList,
    ) -> Result<(), TaskList> {
        let mut inbox = self.inbox.lock();
        if inbox.abort {
            return Err(batch);
        }

        self.task_found_or_abort.store(true, Ordering::Relaxed);

        let first_enqueuer = inbox.queue.is_empty();
        inbox.queue.append(batch);
        self.ensure_worker_active(pool, first_enqueuer, inbox);
        Ok(())
    }

    /// Pushes a task straight into the private queue. Callable only on the
    /// worker's own thread.
    pub(crate) fn enqueue_local(
        &self,
        pool: &PoolInner,
        task: Box<Task>,
    ) -> Result<(), PoolShutdown> {
        if self.atomic_abort.load(Ordering::Relaxed) {
            return Err(PoolShutdown::new(&pool.name));
        }

        debug_assert_eq!(current_worker_index(pool), Some(self.index));
        // SAFETY: this is the thread running this worker's loop.
        unsafe { (*self.private_queue.get()).push_back(task) };
        Ok(())
    }

    /// Wake-up protocol. Entered with the inbox lock held; consumes it.
    ///
    /// A running worker gets at most one semaphore release per public-queue
    /// refill (`first_enqueuer`); an idle worker gets a fresh OS thread, and
    /// any stale handle from a previous idle cycle is joined outside the
    /// lock so no enqueuer ever blocks the pool on a dying thread.
    fn ensure_worker_active(
        &self,
        pool: &Arc<PoolInner>,
        first_enqueuer: bool,
        mut inbox: MutexGuard<'_, Inbox>,
    ) {
        if !inbox.idle {
            drop(inbox);
            if first_enqueuer {
                self.semaphore.release();
            }
            return;
        }

        let stale_thread = inbox.thread.take();
        let entry_pool = Arc::clone(pool);
        let index = self.index;
        inbox.thread = Some(
            thread::Builder::new()
                .name(self.thread_name.clone())
                .spawn(move || work_loop(entry_pool, index))
                .expect("failed to spawn worker thread"),
        );
        inbox.idle = false;
        drop(inbox);

        pool.metrics.threads_spawned.fetch_add(1, Ordering::Relaxed);
        trace!(worker = self.index, "spawned worker thread");

        if let Some(stale) = stale_thread {
            let _ = stale.join();
        }
    }

    /// Parks until the public queue is refilled, shutdown is signaled, or
    /// the idle timeout expires.
    ///
    /// Entered with the inbox lock held. Returns the reacquired guard when
    /// there is work (or shutdown) to process; returns `None` after marking
    /// the worker idle when the thread should retire.
    fn wait_for_task<'a>(
        &'a self,
        pool: &PoolInner,
        inbox: MutexGuard<'a, Inbox>,
    ) -> Option<MutexGuard<'a, Inbox>> {
        if !inbox.queue.is_empty() || inbox.abort {
            return Some(inbox);
        }
        drop(inbox);

        pool.idle_workers.set_idle(self.index);

        let deadline = Instant::now() + self.max_idle_time;
        let mut event_found = false;
        let mut held: Option<MutexGuard<'a, Inbox>> = None;

        loop {
            if !self.semaphore.acquire_until(deadline) {
                break; // idle timeout
            }

            if !self.task_found_or_abort.load(Ordering::Relaxed) {
                continue; // stale wake-up
            }

            let guard = self.inbox.lock();
            if guard.queue.is_empty() && !guard.abort {
                drop(guard);
                continue;
            }

            event_found = true;
            held = Some(guard);
            break;
        }

        let mut inbox = held.unwrap_or_else(|| self.inbox.lock());
        // a producer may have refilled the queue right as the idle timeout
        // fired, having seen this thread still running; retiring now would
        // strand that work until the next enqueue
        if !event_found && !inbox.queue.is_empty() {
            event_found = true;
        }
        if !event_found || inbox.abort {
            inbox.idle = true;
            return None;
        }

        debug_assert!(!inbox.queue.is_empty());
        pool.idle_workers.set_active(self.index);
        Some(inbox)
    }

    /// One wait-swap-drain cycle. Returns `Ok(false)` when the thread
    /// should retire; `Err` propagates a shutdown signal raised by a task.
    fn drain_queue(
        &self,
        pool: &Arc<PoolInner>,
        idle_scratch: &mut Vec<usize>,
    ) -> Result<bool, PoolShutdown> {
        let inbox = self.inbox.lock();
        let Some(mut inbox) = self.wait_for_task(pool, inbox) else {
            return Ok(false);
        };

        self.task_found_or_abort.store(false, Ordering::Relaxed);

        if inbox.abort {
            inbox.idle = true;
            return Ok(false);
        }

        let batch = inbox.queue.take();
        drop(inbox);

        // SAFETY: this is the thread running this worker's loop.
        unsafe {
            debug_assert!((*self.private_queue.get()).is_empty());
            (*self.private_queue.get()).append(batch);
        }

        self.drain_queue_impl(pool, idle_scratch)
    }

    fn drain_queue_impl(
        &self,
        pool: &Arc<PoolInner>,
        idle_scratch: &mut Vec<usize>,
    ) -> Result<bool, PoolShutdown> {
        let mut aborted = false;

        loop {
            // SAFETY: this is the thread running this worker's loop; each
            // access ends before the task runs, so reentrant submissions
            // from inside `resume` are fine.
            if unsafe { (*self.private_queue.get()).is_empty() } {
                break;
            }

            self.balance_work(pool, idle_scratch);

            if self.atomic_abort.load(Ordering::Relaxed) {
                aborted = true;
                break;
            }

            // SAFETY: as above; donation always keeps at least one task.
            let Some(task) = (unsafe { (*self.private_queue.get()).pop_front() }) else {
                break;
            };
            pool.metrics.tasks_executed.fetch_add(1, Ordering::Relaxed);
            task.resume()?;
        }

        if aborted {
            self.inbox.lock().idle = true;
            return Ok(false);
        }
        Ok(true)
    }

    /// Donates surplus private-queue tasks to idle peers.
    ///
    /// Claims up to `min(pool_size - 1, backlog - 1)` idle workers and
    /// splits the backlog evenly among them and itself, handing extras to
    /// the first claimed recipients. The donor always keeps at least one
    /// task.
    fn balance_work(&self, pool: &Arc<PoolInner>, idle_scratch: &mut Vec<usize>) {
        // SAFETY: this is the thread running this worker's loop.
        let task_count = unsafe { (*self.private_queue.get()).len() };
        if task_count < 2 {
            return;
        }

        let max_idle_worker_count = (self.pool_size - 1).min(task_count - 1);
        if max_idle_worker_count == 0 {
            return; // single-threaded pool
        }

        idle_scratch.clear();
        pool.idle_workers
            .find_idle_workers(self.index, idle_scratch, max_idle_worker_count);
        let idle_count = idle_scratch.len();
        if idle_count == 0 {
            return;
        }

        debug_assert!(idle_count <= task_count);
        let (donation_count, mut extra) = donation_split(task_count, idle_count);

        for &target in idle_scratch.iter() {
            debug_assert!(target != self.index);

            let mut count = donation_count;
            if extra != 0 {
                count += 1;
                extra -= 1;
            }

            // SAFETY: this is the thread running this worker's loop.
            let batch = unsafe { (*self.private_queue.get()).split_front(count) };
            match pool.workers[target].enqueue_foreign_batch(pool, batch) {
                Ok(()) => {
                    pool.metrics
                        .tasks_donated
                        .fetch_add(count as u64, Ordering::Relaxed);
                    trace!(from = self.index, to = target, count, "donated tasks");
                }
                Err(rejected) => {
                    // target is shutting down; keep the batch so our own
                    // shutdown drain interrupts it
                    // SAFETY: as above.
                    unsafe { (*self.private_queue.get()).prepend(rejected) };
                    break;
                }
            }
        }

        idle_scratch.clear();
        // SAFETY: as above.
        debug_assert!(unsafe { !(*self.private_queue.get()).is_empty() });
    }

    /// Stops this worker and interrupts everything left in its queues.
    /// Called exactly once, from the pool's shutdown.
    pub(crate) fn shutdown(&self, pool: &PoolInner) {
        debug_assert!(!self.atomic_abort.load(Ordering::Relaxed));
        self.atomic_abort.store(true, Ordering::Relaxed);

        {
            let mut inbox = self.inbox.lock();
            inbox.abort = true;
        }

        self.task_found_or_abort.store(true, Ordering::Relaxed);
        self.semaphore.release();

        let thread = self.inbox.lock().thread.take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!(worker = self.index, "worker thread had panicked");
            }
        }

        let (mut public, mut private) = {
            let mut inbox = self.inbox.lock();
            // a panicked worker thread never reports itself idle; the join
            // above makes it so
            inbox.idle = true;
            let public = inbox.queue.take();
            // SAFETY: the worker thread is joined and `abort` bars any
            // respawn; nothing else can reach the private queue now.
            let private = unsafe { (*self.private_queue.get()).take() };
            (public, private)
        };

        let mut interrupted = 0u64;
        while let Some(task) = public.pop_front() {
            task.interrupt();
            interrupted += 1;
        }
        while let Some(task) = private.pop_front() {
            task.interrupt();
            interrupted += 1;
        }

        if interrupted > 0 {
            pool.metrics
                .tasks_interrupted
                .fetch_add(interrupted, Ordering::Relaxed);
        }
        debug!(worker = self.index, interrupted, "worker shut down");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let inbox = self.inbox.get_mut();
        debug_assert!(inbox.idle);
        debug_assert!(inbox.thread.is_none(), "worker dropped with live thread");
    }
}

/// Thread entry: drains until retirement or shutdown.
pub(crate) fn work_loop(pool: Arc<PoolInner>, index: usize) {
    THREAD_POOL_DATA.with(|tls| {
        tls.pool.set(Arc::as_ptr(&pool));
        tls.worker_index.set(index);
    });

    let worker = &pool.workers[index];
    let mut idle_scratch: Vec<usize> = Vec::with_capacity(worker.pool_size);

    loop {
        match worker.drain_queue(&pool, &mut idle_scratch) {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) => {
                // a task observed pool shutdown; retire quietly
                worker.inbox.lock().idle = true;
                break;
            }
        }
    }

    pool.metrics.threads_retired.fetch_add(1, Ordering::Relaxed);
    trace!(worker = index, "worker thread retired");
}

/// Per-recipient base share and remainder for a donation round: the backlog
/// is divided by `idle_count + 1` so the donor keeps its own share.
fn donation_split(task_count: usize, idle_count: usize) -> (usize, usize) {
    let total_worker_count = idle_count + 1;
    (
        task_count / total_worker_count,
        task_count % total_worker_count,
    )
}
