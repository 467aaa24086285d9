//! # threadmill - Fixed-Size Thread Pool with Task Donation
//!
//! A thread-pool executor that accepts opaque tasks from any thread and runs
//! them on a bounded set of dedicated worker threads. Instead of work
//! stealing, a busy worker proactively *donates* surplus tasks from its
//! backlog to peers it finds in the pool's idle set, so parallelism ramps up
//! without idle workers spinning on other workers' queues.
//!
//! ## Architecture
//!
//! - **Per-worker queues**: every worker has a lock-protected public inbox
//!   for foreign producers and an unshared private queue it drains by
//!   itself. There is no global queue.
//! - **Idle set**: one cache-line-padded atomic flag per worker, with an
//!   approximate counter as a fast path. Claiming an idle worker is a
//!   single atomic exchange, so no two producers ever wake the same worker
//!   for the same idle period.
//! - **Lazy threads**: worker threads are spawned on demand and retire
//!   after an idle timeout; the pool transparently respawns them when work
//!   arrives again.
//! - **Counters**: completion/cancellation observers for tracking when
//!   submitted tasks have settled.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use threadmill::{PoolConfig, ThreadPool};
//!
//! let pool = ThreadPool::new(PoolConfig {
//!     name: "example".to_string(),
//!     pool_size: 2,
//!     max_idle_time: Duration::from_millis(500),
//! });
//!
//! let counter = pool.run(|| println!("hello from a worker")).unwrap();
//! counter.wait();
//! pool.shutdown();
//! ```

pub mod counter;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod task;

mod idle;
mod list;
mod park;
mod worker;

pub use counter::Counter;
pub use error::PoolShutdown;
pub use metrics::MetricsSnapshot;
pub use pool::{PoolConfig, ThreadPool};
pub use task::{Runnable, Task};
