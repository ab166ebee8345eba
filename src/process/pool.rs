/*!
 * Worker Pool
 * Distributes work items over a bounded queue, one forked worker per item
 */

use super::controller::Controller;
use super::handle::ProcessHandle;
use super::queue::{Queue, QueueConfig};
use crate::core::errors::ProcessResult;
use crate::core::limits::{DEFAULT_MAX_WORKERS, DEFAULT_PRIORITY};
use crate::core::types::ExitCode;
use std::sync::Arc;
use tracing::info;

/// Worker function type
pub type WorkerFn<T> = Arc<dyn Fn(T) -> ExitCode + Send + Sync>;

/// Pool running `worker(item)` in a child process for every item
pub struct WorkerPool<T> {
    worker: WorkerFn<T>,
    queue: Queue,
}

impl<T> WorkerPool<T>
where
    T: Send + 'static,
{
    /// Pool on the process-wide default controller
    pub fn new<F, I>(worker: F, work: I, max_workers: usize) -> ProcessResult<Self>
    where
        F: Fn(T) -> ExitCode + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        Self::with_controller(Controller::global()?, worker, work, max_workers)
    }

    /// Pool with `DEFAULT_MAX_WORKERS` concurrent workers
    pub fn with_default_workers<F, I>(worker: F, work: I) -> ProcessResult<Self>
    where
        F: Fn(T) -> ExitCode + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        Self::new(worker, work, DEFAULT_MAX_WORKERS)
    }

    pub fn with_controller<F, I>(
        controller: Controller,
        worker: F,
        work: I,
        max_workers: usize,
    ) -> ProcessResult<Self>
    where
        F: Fn(T) -> ExitCode + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        let queue = Queue::with_controller(controller, QueueConfig::default().with_limit(max_workers));
        let pool = Self {
            worker: Arc::new(worker),
            queue,
        };

        for item in work {
            pool.add_work(item)?;
        }

        info!(max_workers, queued = pool.queue.len(), "Worker pool initialized");
        Ok(pool)
    }

    /// Start workers, optionally waiting for all of them
    pub fn start(&self, block: bool) -> ProcessResult<()> {
        self.queue.start(block)
    }

    pub fn wait(&self) -> ProcessResult<()> {
        self.queue.wait()
    }

    /// Queue one more item; it runs right away if the pool is already working
    pub fn add_work(&self, item: T) -> ProcessResult<ProcessHandle> {
        let worker = Arc::clone(&self.worker);
        self.queue.insert_fn(move |_| worker(item), DEFAULT_PRIORITY)
    }

    #[must_use]
    pub fn queue(&self) -> &Queue {
        &self.queue
    }
}
