//! Idle-worker tracking.
//!
//! One cache-line-padded atomic flag per worker records whether that worker
//! currently has a thread running its loop, plus an approximate population
//! counter that lets producers skip the scan entirely when the pool looks
//! saturated.
//!
//! # Ordering
//! All operations are `Relaxed`. The flag exchange in
//! [`try_acquire_flag`](IdleWorkerSet::try_acquire_flag) guarantees at most
//! one caller wins each idle→active transition; the data handed to a
//! claimed worker is published through its inbox lock, not through these
//! flags. The counter may transiently over- or under-count, which only
//! costs a wasted scan or a missed donation, never correctness.

use std::sync::atomic::{AtomicIsize, AtomicU8, Ordering};

use crossbeam_utils::CachePadded;

const ACTIVE: u8 = 0;
const IDLE: u8 = 1;

pub(crate) struct IdleWorkerSet {
    approx_size: AtomicIsize,
    flags: Box<[CachePadded<AtomicU8>]>,
}

impl IdleWorkerSet {
    pub(crate) fn new(size: usize) -> Self {
        let flags = (0..size)
            .map(|_| CachePadded::new(AtomicU8::new(ACTIVE)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            approx_size: AtomicIsize::new(0),
            flags,
        }
    }

    /// Marks worker `index` idle. No-op if it already is.
    pub(crate) fn set_idle(&self, index: usize) {
        let before = self.flags[index].swap(IDLE, Ordering::Relaxed);
        if before == IDLE {
            return;
        }
        self.approx_size.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks worker `index` active. No-op if it already is.
    pub(crate) fn set_active(&self, index: usize) {
        let before = self.flags[index].swap(ACTIVE, Ordering::Relaxed);
        if before == ACTIVE {
            return;
        }
        self.approx_size.fetch_sub(1, Ordering::Relaxed);
    }

    /// Attempts to claim worker `index`, transitioning it idle→active.
    ///
    /// Returns `true` for exactly one caller per idle period. The fast-path
    /// load avoids writing the line when the worker is visibly active.
    pub(crate) fn try_acquire_flag(&self, index: usize) -> bool {
        if self.flags[index].load(Ordering::Relaxed) == ACTIVE {
            return false;
        }

        let before = self.flags[index].swap(ACTIVE, Ordering::Relaxed);
        let claimed = before == IDLE;
        if claimed {
            self.approx_size.fetch_sub(1, Ordering::Relaxed);
        }
        claimed
    }

    /// Claims one idle worker, scanning circularly from `start` and
    /// skipping `skip` (the caller's own slot, when the caller is a worker).
    pub(crate) fn find_idle_worker(&self, skip: Option<usize>, start: usize) -> Option<usize> {
        if self.approx_size.load(Ordering::Relaxed) <= 0 {
            return None;
        }

        let size = self.flags.len();
        for offset in 0..size {
            let index = (start + offset) % size;
            if Some(index) == skip {
                continue;
            }
            if self.try_acquire_flag(index) {
                return Some(index);
            }
        }
        None
    }

    /// Claims up to `max_count` idle workers into `out`, scanning from the
    /// caller's slot and skipping it. Opportunistic: the result may be
    /// shorter than both `max_count` and the true idle population.
    pub(crate) fn find_idle_workers(&self, caller: usize, out: &mut Vec<usize>, max_count: usize) {
        let approx_size = self.approx_size.load(Ordering::Relaxed);
        if approx_size <= 0 {
            return;
        }

        let size = self.flags.len();
        debug_assert!(caller < size);

        let wanted = max_count.min(approx_size as usize);
        let mut count = 0;
        for offset in 0..size {
            if count >= wanted {
                break;
            }
            let index = (caller + offset) % size;
            if index == caller {
                continue;
            }
            if self.try_acquire_flag(index) {
                out.push(index);
                count += 1;
            }
        }
    }

    /// Approximate number of idle workers. May be stale in either direction.
    pub(crate) fn approx_len(&self) -> usize {
        self.approx_size.load(Ordering::Relaxed).max(0) as usize
    }
}
