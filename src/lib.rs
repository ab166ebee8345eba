/*!
 * forkq
 * Fork-based process orchestration exposed as a library
 *
 * - `ProcessHandle`: one forked process and its lifecycle state machine
 * - `Controller`: per-process reaping and SIGCHLD bridging
 * - `Queue`: priority-ordered, concurrency-bounded job scheduling
 * - `WorkerPool`: a fixed set of work items over a bounded queue
 * - `Lock`: named SysV semaphore used for the fork handshake
 */

#[cfg(not(unix))]
compile_error!("forkq requires a Unix platform (fork, waitpid, SysV semaphores)");

pub mod core;
pub mod monitoring;
pub mod process;
pub mod signals;

// Re-exports
pub use crate::core::errors::{ProcessError, ProcessResult};
pub use crate::core::sync::{Lock, LockKey, LockOptions};
pub use crate::core::types::{ExitCode, Pid, Priority, EXIT_FAILURE, EXIT_SUCCESS};
pub use monitoring::init_tracing;
pub use process::{
    Controller, Event, ProcessHandle, ProcessStatus, Queue, QueueConfig, QueueStats, Termination,
    WaitOutcome, WaitTarget, WorkerPool,
};

pub use nix::sys::signal::Signal;
