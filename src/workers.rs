use crate::common::ceil_div;

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::ops::Range;

/// A static, contiguous division of outer iterations across workers.
///
/// Every active worker but the last runs `iterations_per_worker` iterations; the last runs
/// `tail_iterations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct WorkerPartition {
    pub total_iterations: u64,
    pub iterations_per_worker: u64,
    pub active_workers: u32,
    pub tail_iterations: u64,
}

/// Splits `total` outer iterations across at most `workers` workers.
///
/// # Examples
/// ```
/// # use std::num::NonZeroU32;
/// # use stridetile::workers::partition;
/// let p = partition(17, NonZeroU32::new(5).unwrap());
/// assert_eq!((p.iterations_per_worker, p.active_workers, p.tail_iterations), (4, 5, 1));
/// ```
pub fn partition(total: u64, workers: NonZeroU32) -> WorkerPartition {
    if total == 0 {
        return WorkerPartition {
            total_iterations: 0,
            iterations_per_worker: 0,
            active_workers: 0,
            tail_iterations: 0,
        };
    }
    let iterations_per_worker = ceil_div(total, u64::from(workers.get()));
    let active_workers = ceil_div(total, iterations_per_worker);
    WorkerPartition {
        total_iterations: total,
        iterations_per_worker,
        // Bounded by `workers`, so this cannot truncate.
        active_workers: active_workers as u32,
        tail_iterations: total - iterations_per_worker * (active_workers - 1),
    }
}

impl WorkerPartition {
    /// The outer iterations run by `worker`, or `None` if the worker is idle.
    pub fn worker_range(&self, worker: u32) -> Option<Range<u64>> {
        if worker >= self.active_workers {
            return None;
        }
        let start = u64::from(worker) * self.iterations_per_worker;
        let len = if worker + 1 == self.active_workers {
            self.tail_iterations
        } else {
            self.iterations_per_worker
        };
        Some(start..start + len)
    }
}
