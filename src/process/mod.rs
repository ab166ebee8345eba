/*!
 * Process Module
 * Forked process lifecycle, reaping, and bounded priority scheduling
 */

pub mod controller;
pub mod handle;
pub mod listeners;
pub mod pool;
pub mod queue;
mod registry;
pub mod types;

// Re-export for convenience
pub use controller::Controller;
pub use handle::{ProcessHandle, Workload};
pub use listeners::Listener;
pub use pool::{WorkerFn, WorkerPool};
pub use queue::{Queue, QueueConfig, QueueStats};
pub use types::{Event, ProcessStatus, Termination, WaitOutcome, WaitTarget};
