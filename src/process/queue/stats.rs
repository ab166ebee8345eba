/*!
 * Queue Statistics
 * Atomic counters with a serializable snapshot
 */

use crate::process::types::ProcessStatus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub finished: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub killed: u64,
    pub admitted: u64,
    /// Highest number of simultaneously active jobs observed
    pub peak_active: usize,
    pub limit: usize,
}

/// Counters updated on admission and exit
#[derive(Debug, Default)]
pub(super) struct AtomicQueueStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    killed: AtomicU64,
    admitted: AtomicU64,
    peak_active: AtomicUsize,
}

impl AtomicQueueStats {
    /// Record an admission; `active` includes the new job
    #[inline]
    pub fn record_admitted(&self, active: usize) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.peak_active.fetch_max(active, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exit(&self, status: ProcessStatus) {
        let counter = match status {
            ProcessStatus::Finished => &self.succeeded,
            ProcessStatus::Failure => &self.failed,
            ProcessStatus::Killed => &self.killed,
            ProcessStatus::Pending | ProcessStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending: usize, active: usize, finished: usize, limit: usize) -> QueueStats {
        QueueStats {
            pending,
            active,
            finished,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            peak_active: self.peak_active.load(Ordering::Relaxed),
            limit,
        }
    }
}
