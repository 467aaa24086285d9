//! Error types surfaced by the pool.

use thiserror::Error;

/// Returned when a task is submitted to a pool that has been shut down, and
/// by task payloads that detect shutdown from inside `resume`.
///
/// The worker treats this as a clean termination signal: it marks itself
/// idle and leaves its loop without touching the remaining queue (the
/// shutdown drain interrupts whatever is left).
#[derive(Debug, Clone, Error)]
#[error("thread pool `{pool_name}` has been shut down")]
pub struct PoolShutdown {
    pool_name: String,
}

impl PoolShutdown {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
        }
    }

    /// Name of the pool that rejected the operation.
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }
}
