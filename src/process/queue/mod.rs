/*!
 * Job Queue
 * Priority-ordered, concurrency-bounded scheduler of forked jobs
 *
 * Admission order is priority descending, ties in insertion order. At most
 * `limit` jobs are active at once (0 = unbounded); each exit re-runs
 * admission, so capacity is refilled as soon as a child is reaped.
 */

use super::controller::Controller;
use super::handle::ProcessHandle;
use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::types::Pid;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::info;

mod config;
mod entry;
mod operations;
mod stats;

pub use config::QueueConfig;
pub use stats::QueueStats;

use entry::Entry;
use stats::AtomicQueueStats;

struct State {
    pending: BinaryHeap<Entry>,
    active: AHashMap<Pid, ProcessHandle>,
    finished: Vec<ProcessHandle>,
    config: QueueConfig,
    // Admission failures raised inside an exit listener, reported by start()/wait()
    deferred_error: Option<ProcessError>,
}

impl State {
    fn is_maxed(&self) -> bool {
        self.config.is_maxed(self.active.len())
    }
}

struct Inner {
    controller: Controller,
    state: Mutex<State>,
    next_seq: AtomicU64,
    stats: AtomicQueueStats,
}

/// Job queue
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

impl Queue {
    /// Queue on the process-wide default controller
    pub fn new(config: QueueConfig) -> ProcessResult<Self> {
        Ok(Self::with_controller(Controller::global()?, config))
    }

    #[must_use]
    pub fn with_controller(controller: Controller, config: QueueConfig) -> Self {
        info!(
            limit = config.limit,
            autostart = config.autostart,
            block = config.block,
            "Queue initialized"
        );

        Self {
            inner: Arc::new(Inner {
                controller,
                state: Mutex::new(State {
                    pending: BinaryHeap::new(),
                    active: AHashMap::new(),
                    finished: Vec::new(),
                    config,
                    deferred_error: None,
                }),
                next_seq: AtomicU64::new(0),
                stats: AtomicQueueStats::default(),
            }),
        }
    }

    #[must_use]
    pub fn controller(&self) -> &Controller {
        &self.inner.controller
    }

    #[must_use]
    pub fn config(&self) -> QueueConfig {
        self.inner.state.lock().config
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.inner.state.lock().config.limit
    }

    pub fn set_autostart(&self, autostart: bool) {
        self.inner.state.lock().config.autostart = autostart;
    }

    pub fn set_block(&self, block: bool) {
        self.inner.state.lock().config.block = block;
    }

    /// Pending (not yet admitted) jobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().pending.is_empty()
    }

    /// Whether any job is currently running
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.inner.state.lock().active.is_empty()
    }

    /// Whether the active set has reached the limit
    #[must_use]
    pub fn is_maxed(&self) -> bool {
        self.inner.state.lock().is_maxed()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Active jobs, ordered by PID
    #[must_use]
    pub fn active(&self) -> Vec<ProcessHandle> {
        let mut active: Vec<ProcessHandle> = self.inner.state.lock().active.values().cloned().collect();
        active.sort_by_key(|handle| handle.pid());
        active
    }

    /// Reaped jobs in completion order
    #[must_use]
    pub fn finished(&self) -> Vec<ProcessHandle> {
        self.inner.state.lock().finished.clone()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        self.inner.stats.snapshot(
            state.pending.len(),
            state.active.len(),
            state.finished.len(),
            state.config.limit,
        )
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Queue")
            .field("pending", &state.pending.len())
            .field("active", &state.active.len())
            .field("finished", &state.finished.len())
            .field("config", &state.config)
            .finish()
    }
}
