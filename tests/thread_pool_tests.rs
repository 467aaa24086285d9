use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use threadmill::{Counter, PoolConfig, PoolShutdown, Runnable, Task, ThreadPool};

fn pool(name: &str, pool_size: usize, max_idle_time: Duration) -> ThreadPool {
    ThreadPool::new(PoolConfig {
        name: name.to_string(),
        pool_size,
        max_idle_time,
    })
}

/// Polls `predicate` until it holds or the timeout expires.
fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

#[test]
fn test_single_worker_runs_fifo() {
    let pool = pool("fifo", 1, Duration::from_millis(100));
    let order = Arc::new(Mutex::new(Vec::new()));
    let counter = Counter::new(10);

    for id in 0..10 {
        let order = order.clone();
        pool.enqueue(Task::with_counter(
            move || order.lock().unwrap().push(id),
            counter.clone(),
        ))
        .unwrap();
    }

    counter.wait();
    assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    pool.shutdown();
}

#[test]
fn test_parallel_speedup() {
    let pool = pool("parallel", 4, Duration::from_secs(5));
    assert_eq!(pool.max_concurrency_level(), 4);

    let task_count = 200;
    let counter = Counter::new(task_count);
    let started = Instant::now();

    for _ in 0..task_count {
        pool.enqueue(Task::with_counter(
            || thread::sleep(Duration::from_millis(2)),
            counter.clone(),
        ))
        .unwrap();
    }

    assert!(counter.wait_timeout(Duration::from_secs(30)));
    let elapsed = started.elapsed();

    // 200 x 2ms is 400ms of serial sleeping; four workers should stay
    // well under that even on a loaded CI box
    assert!(
        elapsed < Duration::from_millis(300),
        "expected parallel execution, took {elapsed:?}"
    );
    pool.shutdown();
}

#[test]
fn test_reentrant_submission_spreads_via_donation() {
    let pool = Arc::new(pool("donate", 4, Duration::from_secs(5)));
    let worker_names = Arc::new(Mutex::new(HashSet::new()));
    let children = Counter::new(100);

    let spawner_pool = pool.clone();
    let spawner_names = worker_names.clone();
    let spawner_children = children.clone();
    let parent = pool
        .run(move || {
            // children are enqueued from inside a worker, so they land in
            // the parent worker's private queue and get donated out
            for _ in 0..100 {
                let names = spawner_names.clone();
                spawner_pool
                    .enqueue(Task::with_counter(
                        move || {
                            let name = thread::current().name().unwrap_or("").to_string();
                            names.lock().unwrap().insert(name);
                            thread::sleep(Duration::from_micros(200));
                        },
                        spawner_children.clone(),
                    ))
                    .unwrap();
            }
        })
        .unwrap();

    parent.wait();
    assert!(children.wait_timeout(Duration::from_secs(30)));

    let distinct = worker_names.lock().unwrap().len();
    assert!(
        distinct >= 2,
        "donation should engage idle peers, saw {distinct} worker(s)"
    );
    assert!(pool.metrics().tasks_donated > 0);
    pool.shutdown();
}

#[test]
fn test_idle_retirement_round_trip() {
    let pool = pool("retire", 1, Duration::from_millis(50));

    let first = pool.run(|| {}).unwrap();
    first.wait();

    // the worker parks, times out, and retires its thread
    assert!(
        wait_until(Duration::from_secs(5), || pool.metrics().threads_retired >= 1),
        "worker never retired after the idle window"
    );

    let second = pool.run(|| {}).unwrap();
    second.wait();

    let metrics = pool.metrics();
    assert!(
        metrics.threads_spawned >= 2,
        "second submission should spawn a fresh thread, metrics: {metrics:?}"
    );
    assert_eq!(metrics.tasks_executed, 2);
    pool.shutdown();
}

#[test]
fn test_shutdown_interrupts_queued_tasks() {
    let pool = pool("interrupt", 1, Duration::from_secs(5));

    let gate = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicBool::new(false));
    let task_gate = gate.clone();
    let task_entered = entered.clone();
    pool.submit(move || {
        task_entered.store(true, Ordering::SeqCst);
        while !task_gate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    })
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || entered
        .load(Ordering::SeqCst)));

    // the worker is pinned on the gate; these five can only wait behind it
    let queued = Counter::new(5);
    for _ in 0..5 {
        pool.enqueue(Task::with_counter(
            || panic!("queued task must never run"),
            queued.clone(),
        ))
        .unwrap();
    }

    // open the gate only after shutdown has marked the worker aborted
    let opener = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        gate.store(true, Ordering::SeqCst);
    });

    pool.shutdown();
    opener.join().unwrap();

    assert!(queued.is_complete());
    assert_eq!(queued.cancelled(), 5);
    assert_eq!(pool.metrics().tasks_interrupted, 5);

    let err: PoolShutdown = pool.submit(|| {}).unwrap_err();
    assert!(err.to_string().contains("interrupt"));
}

#[test]
fn test_producer_race() {
    let pool = Arc::new(pool("race", 4, Duration::from_millis(200)));
    let producers = 8;
    let per_producer = 2000;

    let executed = Arc::new(AtomicUsize::new(0));
    let counter = Counter::new(producers * per_producer);

    let mut handles = Vec::new();
    for _ in 0..producers {
        let pool = pool.clone();
        let executed = executed.clone();
        let counter = counter.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..per_producer {
                let executed = executed.clone();
                pool.enqueue(Task::with_counter(
                    move || {
                        executed.fetch_add(1, Ordering::Relaxed);
                    },
                    counter.clone(),
                ))
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(counter.wait_timeout(Duration::from_secs(60)));
    assert_eq!(executed.load(Ordering::Relaxed), producers * per_producer);

    // once the pool quiesces, every worker is marked idle again
    assert!(
        wait_until(Duration::from_secs(5), || pool.approx_idle_workers() == 4),
        "idle set never returned to pool size, at {}",
        pool.approx_idle_workers()
    );
    pool.shutdown();
}

#[test]
fn test_conservation_under_racing_shutdown() {
    struct Probe {
        resumed: Arc<AtomicUsize>,
        interrupted: Arc<AtomicUsize>,
    }

    impl Runnable for Probe {
        fn resume(self: Box<Self>) -> Result<(), PoolShutdown> {
            self.resumed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn interrupt(self: Box<Self>) {
            self.interrupted.fetch_add(1, Ordering::SeqCst);
        }
    }

    let pool = Arc::new(pool("conserve", 4, Duration::from_millis(200)));
    let resumed = Arc::new(AtomicUsize::new(0));
    let interrupted = Arc::new(AtomicUsize::new(0));
    let admitted = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        let resumed = resumed.clone();
        let interrupted = interrupted.clone();
        let admitted = admitted.clone();
        producers.push(thread::spawn(move || {
            for _ in 0..5000 {
                let task = Task::from_runnable(Box::new(Probe {
                    resumed: resumed.clone(),
                    interrupted: interrupted.clone(),
                }));
                match pool.enqueue(task) {
                    Ok(()) => {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(_) => break,
                }
            }
        }));
    }

    thread::sleep(Duration::from_millis(5));
    pool.shutdown();
    for producer in producers {
        producer.join().unwrap();
    }

    // shutdown has joined every worker, so the books are closed: every
    // admitted task was either resumed or interrupted, never both
    let resumed = resumed.load(Ordering::SeqCst);
    let interrupted = interrupted.load(Ordering::SeqCst);
    assert_eq!(
        resumed + interrupted,
        admitted.load(Ordering::SeqCst),
        "resumed {resumed} + interrupted {interrupted}"
    );
}

#[test]
fn test_drop_shuts_down() {
    struct Probe {
        settled: Arc<AtomicUsize>,
    }

    impl Runnable for Probe {
        fn resume(self: Box<Self>) -> Result<(), PoolShutdown> {
            self.settled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn interrupt(self: Box<Self>) {
            self.settled.fetch_add(1, Ordering::SeqCst);
        }
    }

    let settled = Arc::new(AtomicUsize::new(0));
    {
        let pool = pool("dropped", 2, Duration::from_secs(5));
        for _ in 0..50 {
            pool.enqueue(Task::from_runnable(Box::new(Probe {
                settled: settled.clone(),
            })))
            .unwrap();
        }
        // the pool goes out of scope mid-flight
    }

    assert_eq!(settled.load(Ordering::SeqCst), 50);
}

#[test]
fn test_task_raised_shutdown_retires_worker_quietly() {
    struct Bail;

    impl Runnable for Bail {
        fn resume(self: Box<Self>) -> Result<(), PoolShutdown> {
            Err(PoolShutdown::new("bail"))
        }
    }

    let pool = pool("bail", 1, Duration::from_millis(100));
    pool.enqueue(Task::from_runnable(Box::new(Bail))).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || pool.metrics().threads_retired >= 1),
        "worker should retire after a task signals shutdown"
    );

    // the pool itself is still accepting; a new thread picks this up
    let counter = pool.run(|| {}).unwrap();
    counter.wait();
    pool.shutdown();
}

#[test]
fn test_shutdown_survives_panicked_worker() {
    let pool = pool("panicky", 1, Duration::from_secs(5));

    let entered = Arc::new(AtomicBool::new(false));
    let task_entered = entered.clone();
    pool.submit(move || {
        task_entered.store(true, Ordering::SeqCst);
        panic!("task panics are the task's own problem");
    })
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || entered
        .load(Ordering::SeqCst)));
    // give the unwinding thread a moment to die
    thread::sleep(Duration::from_millis(50));

    // the dead worker never drains these; shutdown must interrupt them
    let stranded = Counter::new(2);
    for _ in 0..2 {
        pool.enqueue(Task::with_counter(|| {}, stranded.clone()))
            .unwrap();
    }

    pool.shutdown();
    assert!(stranded.is_complete());
    assert_eq!(stranded.cancelled(), 2);
}

#[test]
fn test_observables() {
    let pool = pool("observe", 3, Duration::from_millis(750));
    assert_eq!(pool.max_concurrency_level(), 3);
    assert_eq!(pool.max_worker_idle_time(), Duration::from_millis(750));
    assert_eq!(pool.name(), "observe");
    assert!(!pool.shutdown_requested());

    pool.shutdown();
    assert!(pool.shutdown_requested());
}
